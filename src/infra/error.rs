use super::store::RelationKind;
use super::types::Id;
use mongodb::error::Error as mongoError;
use rocket::http::Status;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::Request;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Error, Debug)]
pub enum RepError {
    #[error("error querying value")]
    QueryError(#[from] mongoError),
    #[error("store unavailable")]
    StoreUnavailable(),
    #[error("{0} already exists")]
    DuplicateRelation(RelationKind),
    #[error("{0} does not exist")]
    RelationMissing(RelationKind),
    #[error("cannot follow yourself")]
    SelfReferenceNotAllowed(),
    #[error("ingredient {0} is listed more than once")]
    DuplicateIngredientInRecipe(Id),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    ValidationFailed(String),
    #[error("{0} already exists")]
    AlreadyExists(&'static str),
    #[error("short link {0} is taken")]
    ShortLinkTaken(String),
    #[error("no free short link after {0} attempts")]
    ShortLinkExhausted(u32),
    #[error("authentication required")]
    Unauthorized(),
    #[error("only the author may change this recipe")]
    Forbidden(),
}

impl RepError {
    pub fn status(&self) -> Status {
        match self {
            RepError::DuplicateRelation(_)
            | RepError::RelationMissing(_)
            | RepError::SelfReferenceNotAllowed()
            | RepError::DuplicateIngredientInRecipe(_)
            | RepError::ValidationFailed(_)
            | RepError::AlreadyExists(_) => Status::BadRequest,
            RepError::NotFound(_) => Status::NotFound,
            RepError::Unauthorized() => Status::Unauthorized,
            RepError::Forbidden() => Status::Forbidden,
            RepError::QueryError(_)
            | RepError::StoreUnavailable()
            | RepError::ShortLinkTaken(_)
            | RepError::ShortLinkExhausted(_) => Status::InternalServerError,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl ErrorBody {
    pub fn new(detail: impl Into<String>) -> Self {
        ErrorBody {
            detail: detail.into(),
        }
    }
}

impl<'r> Responder<'r, 'static> for RepError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        if status == Status::InternalServerError {
            error!(error = ?self, uri = %request.uri(), "request failed");
        } else {
            debug!(error = %self, uri = %request.uri(), "request rejected");
        }
        Response::build_from(Json(ErrorBody::new(self.to_string())).respond_to(request)?)
            .status(status)
            .ok()
    }
}
