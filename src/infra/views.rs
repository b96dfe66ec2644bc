use super::error::RepError;
use super::store::{RecipeFilter, RecipeStore, RelationKind};
use super::types::{Id, Ingredient, Recipe, Tag, User};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Serialize)]
pub struct TagView {
    pub id: String,
    pub name: String,
    pub slug: String,
}

impl From<&Tag> for TagView {
    fn from(tag: &Tag) -> Self {
        TagView {
            id: tag.id.to_hex(),
            name: tag.name.clone(),
            slug: tag.slug.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IngredientView {
    pub id: String,
    pub name: String,
    pub measurement_unit: String,
}

impl From<&Ingredient> for IngredientView {
    fn from(ingredient: &Ingredient) -> Self {
        IngredientView {
            id: ingredient.id.to_hex(),
            name: ingredient.name.clone(),
            measurement_unit: ingredient.measurement_unit.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserView {
    pub email: String,
    pub id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_subscribed: bool,
    pub avatar: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AvatarView {
    pub avatar: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LineView {
    pub id: String,
    pub name: String,
    pub measurement_unit: String,
    pub amount: u32,
}

#[derive(Debug, Serialize)]
pub struct RecipeView {
    pub id: String,
    pub tags: Vec<TagView>,
    pub author: UserView,
    pub ingredients: Vec<LineView>,
    pub is_favorited: bool,
    pub is_in_shopping_cart: bool,
    pub name: String,
    pub image: Option<String>,
    pub text: String,
    pub cooking_time: u32,
    pub pub_date: String,
}

/// Compact recipe card used by favorites, cart and subscriptions.
#[derive(Debug, Serialize)]
pub struct RecipeShortView {
    pub id: String,
    pub name: String,
    pub image: Option<String>,
    pub cooking_time: u32,
}

impl From<&Recipe> for RecipeShortView {
    fn from(recipe: &Recipe) -> Self {
        RecipeShortView {
            id: recipe.id.to_hex(),
            name: recipe.name.clone(),
            image: recipe.image.clone(),
            cooking_time: recipe.cooking_time,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubscriptionView {
    #[serde(flatten)]
    pub user: UserView,
    pub recipes: Vec<RecipeShortView>,
    pub recipes_count: u64,
}

#[derive(Debug, Serialize)]
pub struct ShortLinkView {
    #[serde(rename = "short-link")]
    pub short_link: String,
}

fn related(
    store: &dyn RecipeStore,
    viewer: Option<&Id>,
    kind: RelationKind,
    target: &Id,
) -> Result<bool, RepError> {
    match viewer {
        Some(viewer) => store.relation_exists(kind, viewer, target),
        None => Ok(false),
    }
}

pub fn user_view(
    store: &dyn RecipeStore,
    viewer: Option<&Id>,
    user: &User,
) -> Result<UserView, RepError> {
    Ok(UserView {
        email: user.email.clone(),
        id: user.id.to_hex(),
        username: user.username.clone(),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        is_subscribed: related(store, viewer, RelationKind::Follow, &user.id)?,
        avatar: user.avatar.clone(),
    })
}

pub fn recipe_view(
    store: &dyn RecipeStore,
    viewer: Option<&Id>,
    recipe: &Recipe,
) -> Result<RecipeView, RepError> {
    let author = store
        .get_user(&recipe.author)?
        .ok_or(RepError::NotFound("user"))?;
    let tags = store.get_tags_by_id(&recipe.tags)?;
    let ids: Vec<Id> = recipe.ingredients.iter().map(|l| l.ingredient).collect();
    let ingredients: HashMap<Id, Ingredient> = store
        .get_ingredients_by_id(&ids)?
        .into_iter()
        .map(|i| (i.id, i))
        .collect();
    let lines = recipe
        .ingredients
        .iter()
        .filter_map(|line| {
            ingredients.get(&line.ingredient).map(|i| LineView {
                id: i.id.to_hex(),
                name: i.name.clone(),
                measurement_unit: i.measurement_unit.clone(),
                amount: line.amount,
            })
        })
        .collect();
    Ok(RecipeView {
        id: recipe.id.to_hex(),
        tags: recipe
            .tags
            .iter()
            .filter_map(|id| tags.iter().find(|t| &t.id == id))
            .map(TagView::from)
            .collect(),
        author: user_view(store, viewer, &author)?,
        ingredients: lines,
        is_favorited: related(store, viewer, RelationKind::Favorite, &recipe.id)?,
        is_in_shopping_cart: related(store, viewer, RelationKind::ShoppingCart, &recipe.id)?,
        name: recipe.name.clone(),
        image: recipe.image.clone(),
        text: recipe.text.clone(),
        cooking_time: recipe.cooking_time,
        pub_date: recipe
            .pub_date
            .try_to_rfc3339_string()
            .unwrap_or_default(),
    })
}

pub fn subscription_view(
    store: &dyn RecipeStore,
    viewer: &Id,
    author: &User,
    recipes_limit: Option<usize>,
) -> Result<SubscriptionView, RepError> {
    let filter = RecipeFilter {
        author: Some(author.id),
        ..Default::default()
    };
    let recipes = store.list_recipes(&filter)?;
    let limit = recipes_limit.unwrap_or(recipes.len());
    Ok(SubscriptionView {
        user: user_view(store, Some(viewer), author)?,
        recipes: recipes.iter().take(limit).map(RecipeShortView::from).collect(),
        recipes_count: store.count_recipes_by_author(&author.id)?,
    })
}
