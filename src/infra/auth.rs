use super::error::RepError;
use super::integrity::parse_id;
use super::store::Repo;
use super::types::User;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use tracing::debug;

/// Header set by the upstream authentication layer once a token is verified.
pub const USER_HEADER: &str = "X-User-Id";

/// The authenticated caller. Use `Option<CurrentUser>` on routes that also
/// serve anonymous requests.
pub struct CurrentUser(pub User);

fn resolve(request: &Request<'_>) -> Result<User, RepError> {
    let raw = request
        .headers()
        .get_one(USER_HEADER)
        .ok_or(RepError::Unauthorized())?;
    let id = parse_id(raw, "user").map_err(|_| RepError::Unauthorized())?;
    let db = request
        .rocket()
        .state::<Repo>()
        .ok_or(RepError::StoreUnavailable())?;
    db.get_user(&id)?.ok_or(RepError::Unauthorized())
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for CurrentUser {
    type Error = RepError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match resolve(request) {
            Ok(user) => Outcome::Success(CurrentUser(user)),
            Err(e) => {
                debug!(error = %e, "request without a usable identity");
                let status = match e {
                    RepError::Unauthorized() => Status::Unauthorized,
                    _ => Status::InternalServerError,
                };
                Outcome::Error((status, e))
            }
        }
    }
}
