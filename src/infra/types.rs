use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

pub type Id = ObjectId;

pub const MIN_AMOUNT: i64 = 1;
pub const MAX_AMOUNT: i64 = 32_000;
pub const MIN_COOKING_TIME: i64 = 1;
pub const MAX_COOKING_TIME: i64 = 32_000;
pub const MAX_USERNAME_LENGTH: usize = 150;
pub const MAX_PERSON_NAME_LENGTH: usize = 150;
pub const MAX_EMAIL_LENGTH: usize = 254;
pub const MAX_NAME_LENGTH: usize = 256;
pub const MAX_SLUG_LENGTH: usize = 32;
pub const MAX_UNIT_LENGTH: usize = 64;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Id,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Tag {
    #[serde(rename = "_id")]
    pub id: Id,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Ingredient {
    #[serde(rename = "_id")]
    pub id: Id,
    pub name: String,
    pub measurement_unit: String,
}

/// Quantity of one ingredient required by one recipe.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct IngredientLine {
    pub ingredient: Id,
    pub amount: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Recipe {
    #[serde(rename = "_id")]
    pub id: Id,
    pub author: Id,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    pub text: String,
    pub cooking_time: u32,
    pub pub_date: DateTime,
    pub tags: Vec<Id>,
    pub ingredients: Vec<IngredientLine>,
    pub short_link: String,
}

/// The mutable part of a recipe, already validated against the store.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeFields {
    pub name: String,
    pub image: Option<String>,
    pub text: String,
    pub cooking_time: u32,
    pub tags: Vec<Id>,
    pub ingredients: Vec<IngredientLine>,
}

impl Recipe {
    pub fn new(author: Id, short_link: String, fields: RecipeFields) -> Self {
        Recipe {
            id: ObjectId::new(),
            author,
            name: fields.name,
            image: fields.image,
            text: fields.text,
            cooking_time: fields.cooking_time,
            pub_date: DateTime::now(),
            tags: fields.tags,
            ingredients: fields.ingredients,
            short_link,
        }
    }

    /// Swaps in new fields, keeping identity, author, date and short link.
    pub fn apply(&mut self, fields: RecipeFields) {
        self.name = fields.name;
        self.image = fields.image;
        self.text = fields.text;
        self.cooking_time = fields.cooking_time;
        self.tags = fields.tags;
        self.ingredients = fields.ingredients;
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTag {
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewIngredient {
    pub name: String,
    pub measurement_unit: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineInput {
    pub id: String,
    pub amount: i64,
}

/// Recipe submission as received from a client, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RecipeDraft {
    pub ingredients: Vec<LineInput>,
    pub tags: Vec<String>,
    #[serde(default)]
    pub image: Option<String>,
    pub name: String,
    pub text: String,
    pub cooking_time: i64,
}

/// Partial recipe edit. Omitted scalar fields keep their stored values; the
/// ingredient and tag lists are always replaced.
#[derive(Debug, Clone, Deserialize)]
pub struct RecipePatch {
    pub ingredients: Vec<LineInput>,
    pub tags: Vec<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub cooking_time: Option<i64>,
}

impl RecipePatch {
    pub fn over(self, stored: &Recipe) -> RecipeDraft {
        RecipeDraft {
            ingredients: self.ingredients,
            tags: self.tags,
            image: self.image.or_else(|| stored.image.clone()),
            name: self.name.unwrap_or_else(|| stored.name.clone()),
            text: self.text.unwrap_or_else(|| stored.text.clone()),
            cooking_time: self.cooking_time.unwrap_or(i64::from(stored.cooking_time)),
        }
    }
}

impl From<RecipeDraft> for RecipePatch {
    fn from(draft: RecipeDraft) -> Self {
        RecipePatch {
            ingredients: draft.ingredients,
            tags: draft.tags,
            image: draft.image,
            name: Some(draft.name),
            text: Some(draft.text),
            cooking_time: Some(draft.cooking_time),
        }
    }
}

/// Opaque avatar reference, stored as given.
#[derive(Debug, Clone, Deserialize)]
pub struct AvatarInput {
    pub avatar: String,
}
