use super::error::RepError;
use super::short_link::{generate_unique_short_link, MAX_SHORT_LINK_ATTEMPTS};
use super::store::{CascadeReport, RecipeStore, RelationKind};
use super::types::{
    AvatarInput, Id, Ingredient, IngredientLine, NewIngredient, NewTag, NewUser, Recipe,
    RecipeDraft, RecipeFields, RecipePatch, Tag, User, MAX_AMOUNT, MAX_COOKING_TIME,
    MAX_EMAIL_LENGTH, MAX_NAME_LENGTH, MAX_PERSON_NAME_LENGTH, MAX_SLUG_LENGTH,
    MAX_UNIT_LENGTH, MAX_USERNAME_LENGTH, MIN_AMOUNT, MIN_COOKING_TIME,
};
use std::collections::HashSet;
use tracing::{info, warn};

pub fn parse_id(raw: &str, what: &'static str) -> Result<Id, RepError> {
    Id::parse_str(raw.trim()).map_err(|_| RepError::NotFound(what))
}

fn require_user(store: &dyn RecipeStore, id: &Id) -> Result<User, RepError> {
    store.get_user(id)?.ok_or(RepError::NotFound("user"))
}

pub fn require_recipe(store: &dyn RecipeStore, id: &Id) -> Result<Recipe, RepError> {
    store.get_recipe(id)?.ok_or(RepError::NotFound("recipe"))
}

fn not_blank(value: &str, field: &str, max: usize) -> Result<String, RepError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(RepError::ValidationFailed(format!("{field} must not be empty")));
    }
    if value.chars().count() > max {
        return Err(RepError::ValidationFailed(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(value.to_string())
}

pub fn register_user(store: &dyn RecipeStore, new: NewUser) -> Result<User, RepError> {
    let username = not_blank(&new.username, "username", MAX_USERNAME_LENGTH)?;
    if username == "me" {
        return Err(RepError::ValidationFailed(
            "username \"me\" is reserved".to_string(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || "_.@+-".contains(c))
    {
        return Err(RepError::ValidationFailed(
            "username contains forbidden characters".to_string(),
        ));
    }
    let email = not_blank(&new.email, "email", MAX_EMAIL_LENGTH)?;
    if !email.contains('@') {
        return Err(RepError::ValidationFailed("invalid email".to_string()));
    }
    store.insert_user(User {
        id: Id::new(),
        username,
        email,
        first_name: not_blank(&new.first_name, "first_name", MAX_PERSON_NAME_LENGTH)?,
        last_name: not_blank(&new.last_name, "last_name", MAX_PERSON_NAME_LENGTH)?,
        avatar: None,
    })
}

pub fn create_tag(store: &dyn RecipeStore, new: NewTag) -> Result<Tag, RepError> {
    let slug = not_blank(&new.slug, "slug", MAX_SLUG_LENGTH)?;
    if !slug
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(RepError::ValidationFailed(format!("invalid slug {slug}")));
    }
    store.insert_tag(Tag {
        id: Id::new(),
        name: not_blank(&new.name, "name", MAX_NAME_LENGTH)?,
        slug,
    })
}

pub fn create_ingredient(
    store: &dyn RecipeStore,
    new: NewIngredient,
) -> Result<Ingredient, RepError> {
    store.insert_ingredient(Ingredient {
        id: Id::new(),
        name: not_blank(&new.name, "name", MAX_NAME_LENGTH)?,
        measurement_unit: not_blank(
            &new.measurement_unit,
            "measurement_unit",
            MAX_UNIT_LENGTH,
        )?,
    })
}

/// Checks a submission and resolves its references.
pub fn validate_recipe(
    store: &dyn RecipeStore,
    draft: RecipeDraft,
) -> Result<RecipeFields, RepError> {
    if draft.ingredients.is_empty() {
        return Err(RepError::ValidationFailed(
            "add at least one ingredient".to_string(),
        ));
    }
    if draft.tags.is_empty() {
        return Err(RepError::ValidationFailed("add at least one tag".to_string()));
    }
    if !(MIN_COOKING_TIME..=MAX_COOKING_TIME).contains(&draft.cooking_time) {
        return Err(RepError::ValidationFailed(format!(
            "cooking time must be between {MIN_COOKING_TIME} and {MAX_COOKING_TIME}"
        )));
    }

    let mut seen = HashSet::new();
    let mut lines = Vec::with_capacity(draft.ingredients.len());
    for input in &draft.ingredients {
        let ingredient = parse_id(&input.id, "ingredient")?;
        if !seen.insert(ingredient) {
            return Err(RepError::DuplicateIngredientInRecipe(ingredient));
        }
        if !(MIN_AMOUNT..=MAX_AMOUNT).contains(&input.amount) {
            return Err(RepError::ValidationFailed(format!(
                "amount must be between {MIN_AMOUNT} and {MAX_AMOUNT}"
            )));
        }
        lines.push(IngredientLine {
            ingredient,
            amount: input.amount as u32,
        });
    }
    let ids: Vec<Id> = lines.iter().map(|l| l.ingredient).collect();
    if store.get_ingredients_by_id(&ids)?.len() != ids.len() {
        return Err(RepError::NotFound("ingredient"));
    }

    let mut tags = Vec::with_capacity(draft.tags.len());
    for raw in &draft.tags {
        let tag = parse_id(raw, "tag")?;
        if tags.contains(&tag) {
            return Err(RepError::ValidationFailed(format!(
                "tag {tag} is listed more than once"
            )));
        }
        tags.push(tag);
    }
    if store.get_tags_by_id(&tags)?.len() != tags.len() {
        return Err(RepError::NotFound("tag"));
    }

    Ok(RecipeFields {
        name: not_blank(&draft.name, "name", MAX_NAME_LENGTH)?,
        image: draft.image,
        text: not_blank(&draft.text, "text", usize::MAX)?,
        cooking_time: draft.cooking_time as u32,
        tags,
        ingredients: lines,
    })
}

/// Validates and stores a new recipe under a fresh short link.
///
/// A code can be taken between the availability check and the insert; the
/// store rejects it and another code is drawn from the same attempt budget.
pub fn create_recipe(
    store: &dyn RecipeStore,
    author: &Id,
    draft: RecipeDraft,
) -> Result<Recipe, RepError> {
    let fields = validate_recipe(store, draft)?;
    for _ in 0..MAX_SHORT_LINK_ATTEMPTS {
        let code = generate_unique_short_link(store)?;
        match store.insert_recipe(Recipe::new(*author, code, fields.clone())) {
            Ok(recipe) => {
                info!(recipe = %recipe.id, short_link = %recipe.short_link, "recipe created");
                return Ok(recipe);
            }
            Err(RepError::ShortLinkTaken(code)) => {
                warn!(code = %code, "short link taken on insert, retrying");
            }
            Err(e) => return Err(e),
        }
    }
    Err(RepError::ShortLinkExhausted(MAX_SHORT_LINK_ATTEMPTS))
}

fn require_author(store: &dyn RecipeStore, user: &Id, id: &Id) -> Result<Recipe, RepError> {
    let recipe = require_recipe(store, id)?;
    if &recipe.author != user {
        return Err(RepError::Forbidden());
    }
    Ok(recipe)
}

/// Replaces the ingredient and tag lists, and whichever other fields the
/// patch carries.
pub fn update_recipe(
    store: &dyn RecipeStore,
    user: &Id,
    id: &Id,
    patch: RecipePatch,
) -> Result<Recipe, RepError> {
    let stored = require_author(store, user, id)?;
    let fields = validate_recipe(store, patch.over(&stored))?;
    store.update_recipe(id, fields)
}

pub fn delete_recipe(
    store: &dyn RecipeStore,
    user: &Id,
    id: &Id,
) -> Result<CascadeReport, RepError> {
    require_author(store, user, id)?;
    let report = store.delete_recipe_cascade(id)?;
    info!(recipe = %id, ?report, "recipe deleted");
    Ok(report)
}

pub fn set_avatar(
    store: &dyn RecipeStore,
    id: &Id,
    input: AvatarInput,
) -> Result<User, RepError> {
    let avatar = not_blank(&input.avatar, "avatar", usize::MAX)?;
    store.set_avatar(id, Some(avatar))
}

pub fn clear_avatar(store: &dyn RecipeStore, id: &Id) -> Result<User, RepError> {
    store.set_avatar(id, None)
}

pub fn delete_user(store: &dyn RecipeStore, id: &Id) -> Result<CascadeReport, RepError> {
    require_user(store, id)?;
    let report = store.delete_user_cascade(id)?;
    info!(user = %id, ?report, "user deleted");
    Ok(report)
}

fn require_target(
    store: &dyn RecipeStore,
    kind: RelationKind,
    b: &Id,
) -> Result<(), RepError> {
    match kind {
        RelationKind::Follow => require_user(store, b).map(|_| ()),
        RelationKind::Favorite | RelationKind::ShoppingCart => {
            require_recipe(store, b).map(|_| ())
        }
    }
}

/// Records the pair `(a, b)` of the given kind.
///
/// Duplicates are detected by the store's own constraint, so two concurrent
/// identical requests leave one row and one `DuplicateRelation`.
pub fn create_relation(
    store: &dyn RecipeStore,
    kind: RelationKind,
    a: &Id,
    b: &Id,
) -> Result<(), RepError> {
    if kind == RelationKind::Follow && a == b {
        return Err(RepError::SelfReferenceNotAllowed());
    }
    require_user(store, a)?;
    require_target(store, kind, b)?;
    store.insert_relation(kind, a, b)?;
    info!(%kind, a = %a, b = %b, "relation created");
    Ok(())
}

pub fn delete_relation(
    store: &dyn RecipeStore,
    kind: RelationKind,
    a: &Id,
    b: &Id,
) -> Result<(), RepError> {
    require_target(store, kind, b)?;
    if !store.remove_relation(kind, a, b)? {
        return Err(RepError::RelationMissing(kind));
    }
    info!(%kind, a = %a, b = %b, "relation removed");
    Ok(())
}
