mod config;
mod infra;
use config::{Config, StoreBackend};
use infra::*;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Header;
use rocket::{Build, Request, Response, Rocket};
use tracing_subscriber::EnvFilter;

#[macro_use]
extern crate rocket;
pub struct CORS;

#[rocket::async_trait]
impl Fairing for CORS {
    fn info(&self) -> Info {
        Info {
            name: "Attaching CORS headers to responses",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _request: &'r Request<'_>, response: &mut Response<'r>) {
        response.set_header(Header::new("Access-Control-Allow-Origin", "*"));
        response.set_header(Header::new(
            "Access-Control-Allow-Methods",
            "POST, GET, PUT, PATCH, DELETE, OPTIONS",
        ));
        response.set_header(Header::new("Access-Control-Allow-Headers", "*"));
        response.set_header(Header::new("Access-Control-Allow-Credentials", "true"));
    }
}

pub fn build_rocket(db: Repo, config: Config) -> Rocket<Build> {
    rocket::build()
        .manage(db)
        .manage(config)
        .mount(
            "/api",
            routes![
                post_user,
                get_users,
                get_me,
                delete_me,
                put_avatar,
                delete_avatar,
                get_subscriptions,
                get_user,
                subscribe,
                unsubscribe,
                post_tag,
                get_tags,
                get_tag,
                post_ingredient,
                get_ingredients,
                get_ingredient,
                get_recipes,
                post_recipe,
                download_shopping_cart,
                get_recipe,
                patch_recipe,
                remove_recipe,
                post_favorite,
                delete_favorite,
                post_shopping_cart,
                delete_shopping_cart,
                get_short_link
            ],
        )
        .mount("/", routes![follow_short_link])
        .register("/", catchers![default_catcher])
        .attach(CORS)
}

#[launch]
fn rocket() -> _ {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::load();
    let db: Repo = match config.store_backend {
        StoreBackend::Mongo => Box::new(
            MongoRep::init(&config.mongo_uri, &config.mongo_database)
                .expect("MongoDB misconfigured!"),
        ),
        StoreBackend::Memory => {
            tracing::warn!("using the in-memory store, data is lost on shutdown");
            Box::new(InMemoryRep::new())
        }
    };
    build_rocket(db, config)
}
