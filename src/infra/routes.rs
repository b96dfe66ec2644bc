use super::auth::CurrentUser;
use super::error::{ErrorBody, RepError};
use super::integrity::{
    clear_avatar, create_ingredient, create_recipe, create_relation, create_tag, delete_recipe,
    delete_relation, delete_user, parse_id, register_user, require_recipe, set_avatar,
    update_recipe,
};
use super::shopping::aggregate_shopping_list;
use super::store::{RecipeFilter, RecipeStore, RelationKind, Repo};
use super::types::{AvatarInput, Id, NewIngredient, NewTag, NewUser, RecipeDraft, RecipePatch};
use super::views::{
    recipe_view, subscription_view, user_view, IngredientView, RecipeShortView, RecipeView,
    AvatarView, ShortLinkView, SubscriptionView, TagView, UserView,
};
use crate::config::Config;
use rocket::http::{Header, Status};
use rocket::response::Redirect;
use rocket::serde::json::Json;
use rocket::{catch, delete, get, patch, post, put, Request, Responder, State};

type Reply<T> = Result<Json<T>, RepError>;
type Created<T> = Result<(Status, Json<T>), RepError>;

fn repo(db: &State<Repo>) -> &dyn RecipeStore {
    db.inner().as_ref()
}

fn viewer_id(viewer: &Option<CurrentUser>) -> Option<&Id> {
    viewer.as_ref().map(|CurrentUser(user)| &user.id)
}

#[derive(Responder)]
#[response(content_type = "plain")]
pub struct ShoppingListFile {
    body: String,
    disposition: Header<'static>,
}

#[post("/users", data = "<new>")]
pub fn post_user(db: &State<Repo>, new: Json<NewUser>) -> Created<UserView> {
    let repo = repo(db);
    let user = register_user(repo, new.into_inner())?;
    Ok((Status::Created, Json(user_view(repo, None, &user)?)))
}

#[get("/users")]
pub fn get_users(db: &State<Repo>, viewer: Option<CurrentUser>) -> Reply<Vec<UserView>> {
    let repo = repo(db);
    let users = repo
        .list_users()?
        .iter()
        .map(|u| user_view(repo, viewer_id(&viewer), u))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(users))
}

#[get("/users/me")]
pub fn get_me(db: &State<Repo>, user: CurrentUser) -> Reply<UserView> {
    let CurrentUser(user) = user;
    Ok(Json(user_view(repo(db), Some(&user.id), &user)?))
}

#[delete("/users/me")]
pub fn delete_me(db: &State<Repo>, user: CurrentUser) -> Result<Status, RepError> {
    delete_user(repo(db), &user.0.id)?;
    Ok(Status::NoContent)
}

#[put("/users/me/avatar", data = "<input>")]
pub fn put_avatar(
    db: &State<Repo>,
    user: CurrentUser,
    input: Json<AvatarInput>,
) -> Reply<AvatarView> {
    let user = set_avatar(repo(db), &user.0.id, input.into_inner())?;
    Ok(Json(AvatarView {
        avatar: user.avatar,
    }))
}

#[delete("/users/me/avatar")]
pub fn delete_avatar(db: &State<Repo>, user: CurrentUser) -> Result<Status, RepError> {
    clear_avatar(repo(db), &user.0.id)?;
    Ok(Status::NoContent)
}

#[get("/users/subscriptions?<recipes_limit>")]
pub fn get_subscriptions(
    db: &State<Repo>,
    user: CurrentUser,
    recipes_limit: Option<usize>,
) -> Reply<Vec<SubscriptionView>> {
    let repo = repo(db);
    let me = &user.0.id;
    let authors = repo.get_users_by_id(&repo.related_ids(RelationKind::Follow, me)?)?;
    let views = authors
        .iter()
        .map(|author| subscription_view(repo, me, author, recipes_limit))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(views))
}

#[get("/users/<id>")]
pub fn get_user(db: &State<Repo>, viewer: Option<CurrentUser>, id: &str) -> Reply<UserView> {
    let repo = repo(db);
    let user = repo
        .get_user(&parse_id(id, "user")?)?
        .ok_or(RepError::NotFound("user"))?;
    Ok(Json(user_view(repo, viewer_id(&viewer), &user)?))
}

#[post("/users/<id>/subscribe?<recipes_limit>")]
pub fn subscribe(
    db: &State<Repo>,
    user: CurrentUser,
    id: &str,
    recipes_limit: Option<usize>,
) -> Created<SubscriptionView> {
    let repo = repo(db);
    let author = parse_id(id, "user")?;
    create_relation(repo, RelationKind::Follow, &user.0.id, &author)?;
    let author = repo.get_user(&author)?.ok_or(RepError::NotFound("user"))?;
    Ok((
        Status::Created,
        Json(subscription_view(repo, &user.0.id, &author, recipes_limit)?),
    ))
}

#[delete("/users/<id>/subscribe")]
pub fn unsubscribe(db: &State<Repo>, user: CurrentUser, id: &str) -> Result<Status, RepError> {
    let author = parse_id(id, "user")?;
    delete_relation(repo(db), RelationKind::Follow, &user.0.id, &author)?;
    Ok(Status::NoContent)
}

#[post("/tags", data = "<new>")]
pub fn post_tag(db: &State<Repo>, _user: CurrentUser, new: Json<NewTag>) -> Created<TagView> {
    let tag = create_tag(repo(db), new.into_inner())?;
    Ok((Status::Created, Json(TagView::from(&tag))))
}

#[get("/tags")]
pub fn get_tags(db: &State<Repo>) -> Reply<Vec<TagView>> {
    Ok(Json(repo(db).list_tags()?.iter().map(TagView::from).collect()))
}

#[get("/tags/<id>")]
pub fn get_tag(db: &State<Repo>, id: &str) -> Reply<TagView> {
    let tags = repo(db).get_tags_by_id(&[parse_id(id, "tag")?])?;
    let tag = tags.first().ok_or(RepError::NotFound("tag"))?;
    Ok(Json(TagView::from(tag)))
}

#[post("/ingredients", data = "<new>")]
pub fn post_ingredient(
    db: &State<Repo>,
    _user: CurrentUser,
    new: Json<NewIngredient>,
) -> Created<IngredientView> {
    let ingredient = create_ingredient(repo(db), new.into_inner())?;
    Ok((Status::Created, Json(IngredientView::from(&ingredient))))
}

#[get("/ingredients?<name>")]
pub fn get_ingredients(db: &State<Repo>, name: Option<&str>) -> Reply<Vec<IngredientView>> {
    let found = repo(db).search_ingredients(name.filter(|n| !n.is_empty()))?;
    Ok(Json(found.iter().map(IngredientView::from).collect()))
}

#[get("/ingredients/<id>")]
pub fn get_ingredient(db: &State<Repo>, id: &str) -> Reply<IngredientView> {
    let found = repo(db).get_ingredients_by_id(&[parse_id(id, "ingredient")?])?;
    let ingredient = found.first().ok_or(RepError::NotFound("ingredient"))?;
    Ok(Json(IngredientView::from(ingredient)))
}

#[get("/recipes?<author>&<tags>&<is_favorited>&<is_in_shopping_cart>")]
pub fn get_recipes(
    db: &State<Repo>,
    viewer: Option<CurrentUser>,
    author: Option<&str>,
    tags: Option<Vec<&str>>,
    is_favorited: Option<u8>,
    is_in_shopping_cart: Option<u8>,
) -> Reply<Vec<RecipeView>> {
    let repo = repo(db);
    let me = viewer_id(&viewer).copied();
    let wants = |flag: Option<u8>| flag == Some(1);
    if (wants(is_favorited) || wants(is_in_shopping_cart)) && me.is_none() {
        return Ok(Json(Vec::new()));
    }
    let author = match author.filter(|a| !a.is_empty()) {
        Some(raw) => match Id::parse_str(raw) {
            Ok(id) => Some(id),
            Err(_) => return Ok(Json(Vec::new())),
        },
        None => None,
    };
    let filter = RecipeFilter {
        author,
        tag_slugs: tags
            .unwrap_or_default()
            .iter()
            .flat_map(|t| t.split(','))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect(),
        favorited_by: me.filter(|_| wants(is_favorited)),
        in_cart_of: me.filter(|_| wants(is_in_shopping_cart)),
    };
    let recipes = repo
        .list_recipes(&filter)?
        .iter()
        .map(|r| recipe_view(repo, me.as_ref(), r))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(recipes))
}

#[post("/recipes", data = "<draft>")]
pub fn post_recipe(
    db: &State<Repo>,
    user: CurrentUser,
    draft: Json<RecipeDraft>,
) -> Created<RecipeView> {
    let repo = repo(db);
    let recipe = create_recipe(repo, &user.0.id, draft.into_inner())?;
    Ok((
        Status::Created,
        Json(recipe_view(repo, Some(&user.0.id), &recipe)?),
    ))
}

#[get("/recipes/download_shopping_cart")]
pub fn download_shopping_cart(
    db: &State<Repo>,
    user: CurrentUser,
) -> Result<ShoppingListFile, RepError> {
    Ok(ShoppingListFile {
        body: aggregate_shopping_list(repo(db), &user.0.id)?,
        disposition: Header::new(
            "Content-Disposition",
            "attachment; filename=\"shopping_list.txt\"",
        ),
    })
}

#[get("/recipes/<id>")]
pub fn get_recipe(db: &State<Repo>, viewer: Option<CurrentUser>, id: &str) -> Reply<RecipeView> {
    let repo = repo(db);
    let recipe = require_recipe(repo, &parse_id(id, "recipe")?)?;
    Ok(Json(recipe_view(repo, viewer_id(&viewer), &recipe)?))
}

#[patch("/recipes/<id>", data = "<changes>")]
pub fn patch_recipe(
    db: &State<Repo>,
    user: CurrentUser,
    id: &str,
    changes: Json<RecipePatch>,
) -> Reply<RecipeView> {
    let repo = repo(db);
    let id = parse_id(id, "recipe")?;
    let recipe = update_recipe(repo, &user.0.id, &id, changes.into_inner())?;
    Ok(Json(recipe_view(repo, Some(&user.0.id), &recipe)?))
}

#[delete("/recipes/<id>")]
pub fn remove_recipe(db: &State<Repo>, user: CurrentUser, id: &str) -> Result<Status, RepError> {
    delete_recipe(repo(db), &user.0.id, &parse_id(id, "recipe")?)?;
    Ok(Status::NoContent)
}

fn add_recipe_relation(
    db: &State<Repo>,
    kind: RelationKind,
    user: &CurrentUser,
    id: &str,
) -> Created<RecipeShortView> {
    let repo = repo(db);
    let recipe = require_recipe(repo, &parse_id(id, "recipe")?)?;
    create_relation(repo, kind, &user.0.id, &recipe.id)?;
    Ok((Status::Created, Json(RecipeShortView::from(&recipe))))
}

fn remove_recipe_relation(
    db: &State<Repo>,
    kind: RelationKind,
    user: &CurrentUser,
    id: &str,
) -> Result<Status, RepError> {
    delete_relation(repo(db), kind, &user.0.id, &parse_id(id, "recipe")?)?;
    Ok(Status::NoContent)
}

#[post("/recipes/<id>/favorite")]
pub fn post_favorite(db: &State<Repo>, user: CurrentUser, id: &str) -> Created<RecipeShortView> {
    add_recipe_relation(db, RelationKind::Favorite, &user, id)
}

#[delete("/recipes/<id>/favorite")]
pub fn delete_favorite(db: &State<Repo>, user: CurrentUser, id: &str) -> Result<Status, RepError> {
    remove_recipe_relation(db, RelationKind::Favorite, &user, id)
}

#[post("/recipes/<id>/shopping_cart")]
pub fn post_shopping_cart(
    db: &State<Repo>,
    user: CurrentUser,
    id: &str,
) -> Created<RecipeShortView> {
    add_recipe_relation(db, RelationKind::ShoppingCart, &user, id)
}

#[delete("/recipes/<id>/shopping_cart")]
pub fn delete_shopping_cart(
    db: &State<Repo>,
    user: CurrentUser,
    id: &str,
) -> Result<Status, RepError> {
    remove_recipe_relation(db, RelationKind::ShoppingCart, &user, id)
}

#[get("/recipes/<id>/get-link")]
pub fn get_short_link(
    db: &State<Repo>,
    config: &State<Config>,
    id: &str,
) -> Reply<ShortLinkView> {
    let recipe = require_recipe(repo(db), &parse_id(id, "recipe")?)?;
    Ok(Json(ShortLinkView {
        short_link: format!("{}/s/{}", config.public_base_url, recipe.short_link),
    }))
}

#[get("/s/<code>")]
pub fn follow_short_link(db: &State<Repo>, code: &str) -> Result<Redirect, RepError> {
    let recipe = repo(db)
        .get_recipe_by_short_link(code)?
        .ok_or(RepError::NotFound("recipe"))?;
    Ok(Redirect::found(format!("/recipes/{}/", recipe.id.to_hex())))
}

#[catch(default)]
pub fn default_catcher(status: Status, _request: &Request<'_>) -> (Status, Json<ErrorBody>) {
    let detail = status.reason().unwrap_or("request failed");
    (status, Json(ErrorBody::new(detail)))
}

#[cfg(test)]
mod tests {
    use crate::build_rocket;
    use crate::config::Config;
    use crate::infra::auth::USER_HEADER;
    use crate::infra::memory::InMemoryRep;
    use rocket::http::{ContentType, Header, Status};
    use rocket::local::blocking::{Client, LocalResponse};
    use serde_json::{json, Value};

    fn init_client() -> Client {
        let rocket = build_rocket(Box::new(InMemoryRep::new()), Config::default());
        Client::tracked(rocket).unwrap()
    }

    fn as_user(id: &str) -> Header<'static> {
        Header::new(USER_HEADER, id.to_string())
    }

    fn body(response: LocalResponse<'_>) -> Value {
        response.into_json::<Value>().unwrap()
    }

    fn signup(client: &Client, name: &str) -> String {
        let response = client
            .post("/api/users")
            .json(&json!({
                "username": name,
                "email": format!("{name}@foodgram.test"),
                "first_name": name,
                "last_name": "Cook",
            }))
            .dispatch();
        assert_eq!(response.status(), Status::Created);
        body(response)["id"].as_str().unwrap().to_string()
    }

    fn post_json(client: &Client, user: &str, uri: &str, payload: Value) -> Value {
        let response = client
            .post(uri.to_string())
            .header(as_user(user))
            .json(&payload)
            .dispatch();
        assert_eq!(response.status(), Status::Created, "POST {uri}");
        body(response)
    }

    /// Creates a user with a tag, two ingredients and one recipe using them.
    fn seed(client: &Client) -> (String, String, Value) {
        let user = signup(client, "alice");
        let tag = post_json(
            client,
            &user,
            "/api/tags",
            json!({"name": "Breakfast", "slug": "breakfast"}),
        );
        let flour = post_json(
            client,
            &user,
            "/api/ingredients",
            json!({"name": "Flour", "measurement_unit": "g"}),
        );
        let salt = post_json(
            client,
            &user,
            "/api/ingredients",
            json!({"name": "Salt", "measurement_unit": "g"}),
        );
        let recipe = post_json(
            client,
            &user,
            "/api/recipes",
            json!({
                "ingredients": [
                    {"id": flour["id"], "amount": 200},
                    {"id": salt["id"], "amount": 5},
                ],
                "tags": [tag["id"]],
                "name": "Bread",
                "text": "Knead and bake",
                "cooking_time": 90,
            }),
        );
        let recipe_id = recipe["id"].as_str().unwrap().to_string();
        (user, recipe_id, recipe)
    }

    #[test]
    fn test_create_recipe_passes() {
        let client = init_client();
        let (user, _, recipe) = seed(&client);
        assert_eq!(recipe["author"]["id"], user.as_str());
        assert_eq!(recipe["ingredients"][0]["name"], "Flour");
        assert_eq!(recipe["ingredients"][0]["amount"], 200);
        assert_eq!(recipe["tags"][0]["slug"], "breakfast");
        assert_eq!(recipe["is_favorited"], false);
    }

    #[test]
    fn test_create_recipe_requires_identity() {
        let client = init_client();
        let response = client
            .post("/api/recipes")
            .header(ContentType::JSON)
            .body("{}")
            .dispatch();
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[test]
    fn test_duplicate_favorite_is_rejected() {
        let client = init_client();
        let (user, recipe, _) = seed(&client);
        let uri = format!("/api/recipes/{recipe}/favorite");
        let first = client.post(uri.clone()).header(as_user(&user)).dispatch();
        assert_eq!(first.status(), Status::Created);
        let second = client.post(uri.clone()).header(as_user(&user)).dispatch();
        assert_eq!(second.status(), Status::BadRequest);
        assert_eq!(body(second)["detail"], "favorite already exists");

        let listed = client
            .get("/api/recipes?is_favorited=1")
            .header(as_user(&user))
            .dispatch();
        let listed = body(listed);
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["is_favorited"], true);
    }

    #[test]
    fn test_self_subscribe_is_rejected() {
        let client = init_client();
        let user = signup(&client, "alice");
        let response = client
            .post(format!("/api/users/{user}/subscribe"))
            .header(as_user(&user))
            .dispatch();
        assert_eq!(response.status(), Status::BadRequest);
        assert_eq!(body(response)["detail"], "cannot follow yourself");
    }

    #[test]
    fn test_subscriptions_list_followed_authors() {
        let client = init_client();
        let (author, _, _) = seed(&client);
        let reader = signup(&client, "bob");
        let created = post_json(
            &client,
            &reader,
            &format!("/api/users/{author}/subscribe"),
            json!({}),
        );
        assert_eq!(created["recipes_count"], 1);
        assert_eq!(created["is_subscribed"], true);

        let response = client
            .get("/api/users/subscriptions?recipes_limit=0")
            .header(as_user(&reader))
            .dispatch();
        let subs = body(response);
        assert_eq!(subs[0]["username"], "alice");
        assert_eq!(subs[0]["recipes"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_download_shopping_cart() {
        let client = init_client();
        let (user, recipe, _) = seed(&client);
        let added = client
            .post(format!("/api/recipes/{recipe}/shopping_cart"))
            .header(as_user(&user))
            .dispatch();
        assert_eq!(added.status(), Status::Created);

        let response = client
            .get("/api/recipes/download_shopping_cart")
            .header(as_user(&user))
            .dispatch();
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.content_type(), Some(ContentType::Plain));
        assert_eq!(
            response.into_string().unwrap(),
            "Shopping list for alice\n\nRecipes in list: 1\n\nIngredients to buy:\n\n\
             Flour - 200 g\nSalt - 5 g\n"
        );
    }

    #[test]
    fn test_short_link_redirects_to_recipe() {
        let client = init_client();
        let (_, recipe, _) = seed(&client);
        let response = client
            .get(format!("/api/recipes/{recipe}/get-link"))
            .dispatch();
        let link = body(response)["short-link"].as_str().unwrap().to_string();
        let path = link.trim_start_matches("http://localhost:8000");
        assert!(path.starts_with("/s/"));

        let response = client.get(path.to_string()).dispatch();
        assert_eq!(response.status(), Status::Found);
        assert_eq!(
            response.headers().get_one("Location"),
            Some(format!("/recipes/{recipe}/").as_str())
        );
    }

    #[test]
    fn test_delete_recipe_by_stranger_is_forbidden() {
        let client = init_client();
        let (_, recipe, _) = seed(&client);
        let stranger = signup(&client, "mallory");
        let response = client
            .delete(format!("/api/recipes/{recipe}"))
            .header(as_user(&stranger))
            .dispatch();
        assert_eq!(response.status(), Status::Forbidden);
    }

    #[test]
    fn test_delete_me_cascades() {
        let client = init_client();
        let (user, recipe, _) = seed(&client);
        let response = client
            .delete("/api/users/me")
            .header(as_user(&user))
            .dispatch();
        assert_eq!(response.status(), Status::NoContent);
        let response = client.get(format!("/api/recipes/{recipe}")).dispatch();
        assert_eq!(response.status(), Status::NotFound);
    }

    #[test]
    fn test_ingredient_prefix_search() {
        let client = init_client();
        seed(&client);
        let response = client.get("/api/ingredients?name=fl").dispatch();
        let found = body(response);
        assert_eq!(found.as_array().unwrap().len(), 1);
        assert_eq!(found[0]["name"], "Flour");
    }

    #[test]
    fn test_recipes_filtered_by_tag() {
        let client = init_client();
        seed(&client);
        let hit = body(client.get("/api/recipes?tags=breakfast").dispatch());
        assert_eq!(hit.as_array().unwrap().len(), 1);
        let miss = body(client.get("/api/recipes?tags=dinner").dispatch());
        assert!(miss.as_array().unwrap().is_empty());
    }

    #[test]
    fn test_avatar_put_then_delete() {
        let client = init_client();
        let user = signup(&client, "alice");
        let response = client
            .put("/api/users/me/avatar")
            .header(as_user(&user))
            .json(&json!({"avatar": "data:image/png;base64,iVBORw0KGgo="}))
            .dispatch();
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(body(response)["avatar"], "data:image/png;base64,iVBORw0KGgo=");

        let me = client.get("/api/users/me").header(as_user(&user)).dispatch();
        assert_eq!(body(me)["avatar"], "data:image/png;base64,iVBORw0KGgo=");

        let removed = client
            .delete("/api/users/me/avatar")
            .header(as_user(&user))
            .dispatch();
        assert_eq!(removed.status(), Status::NoContent);
        let me = client.get("/api/users/me").header(as_user(&user)).dispatch();
        assert!(body(me)["avatar"].is_null());
    }

    #[test]
    fn test_patch_recipe_without_scalar_fields() {
        let client = init_client();
        let (user, recipe, created) = seed(&client);
        let response = client
            .patch(format!("/api/recipes/{recipe}"))
            .header(as_user(&user))
            .json(&json!({
                "ingredients": [{"id": created["ingredients"][1]["id"], "amount": 7}],
                "tags": [created["tags"][0]["id"]],
            }))
            .dispatch();
        assert_eq!(response.status(), Status::Ok);
        let updated = body(response);
        assert_eq!(updated["name"], "Bread");
        assert_eq!(updated["cooking_time"], 90);
        assert_eq!(updated["ingredients"].as_array().unwrap().len(), 1);
        assert_eq!(updated["ingredients"][0]["amount"], 7);
    }
}
