use super::error::RepError;
use super::types::{Id, Ingredient, Recipe, RecipeFields, Tag, User};
use std::fmt;

/// Pair relations guarded by a uniqueness constraint on `(a, b)`.
///
/// For `Favorite` and `ShoppingCart` the pair is `(user, recipe)`, for `Follow`
/// it is `(follower, followee)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelationKind {
    Favorite,
    ShoppingCart,
    Follow,
}

impl RelationKind {
    pub fn collection(&self) -> &'static str {
        match self {
            RelationKind::Favorite => "favorites",
            RelationKind::ShoppingCart => "shopping_carts",
            RelationKind::Follow => "follows",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelationKind::Favorite => "favorite",
            RelationKind::ShoppingCart => "shopping cart entry",
            RelationKind::Follow => "subscription",
        };
        f.write_str(name)
    }
}

/// Conjunctive recipe listing filter. Empty filter lists everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecipeFilter {
    pub author: Option<Id>,
    /// Every slug must be present on the recipe.
    pub tag_slugs: Vec<String>,
    pub favorited_by: Option<Id>,
    pub in_cart_of: Option<Id>,
}

/// Rows removed by a cascading delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub users: u64,
    pub recipes: u64,
    pub favorites: u64,
    pub cart_entries: u64,
    pub follows: u64,
}

/// Persistence seam. Implementations must enforce every uniqueness rule
/// themselves: duplicate inserts fail, they are never silently merged.
///
/// * `insert_relation` fails with `DuplicateRelation` when the pair exists and
///   with `NotFound` when either end is gone. The check and the write are one
///   atomic step, so a concurrent cascade cannot leave the row orphaned.
/// * `insert_recipe` fails with `ShortLinkTaken` when the code is in use and
///   with `NotFound` when the author is gone, under the same atomicity.
/// * `insert_user`, `insert_tag`, `insert_ingredient` fail with `AlreadyExists`.
/// * `delete_*_cascade` remove every dependent row atomically.
pub trait RecipeStore: Send + Sync {
    fn insert_user(&self, user: User) -> Result<User, RepError>;
    fn get_user(&self, id: &Id) -> Result<Option<User>, RepError>;
    fn get_users_by_id(&self, ids: &[Id]) -> Result<Vec<User>, RepError>;
    fn list_users(&self) -> Result<Vec<User>, RepError>;
    fn set_avatar(&self, id: &Id, avatar: Option<String>) -> Result<User, RepError>;
    fn delete_user_cascade(&self, id: &Id) -> Result<CascadeReport, RepError>;

    fn insert_tag(&self, tag: Tag) -> Result<Tag, RepError>;
    fn get_tags_by_id(&self, ids: &[Id]) -> Result<Vec<Tag>, RepError>;
    fn list_tags(&self) -> Result<Vec<Tag>, RepError>;

    fn insert_ingredient(&self, ingredient: Ingredient) -> Result<Ingredient, RepError>;
    fn get_ingredients_by_id(&self, ids: &[Id]) -> Result<Vec<Ingredient>, RepError>;
    /// Case-insensitive name prefix search, ordered by name.
    fn search_ingredients(&self, prefix: Option<&str>) -> Result<Vec<Ingredient>, RepError>;

    fn insert_recipe(&self, recipe: Recipe) -> Result<Recipe, RepError>;
    fn get_recipe(&self, id: &Id) -> Result<Option<Recipe>, RepError>;
    fn get_recipes_by_id(&self, ids: &[Id]) -> Result<Vec<Recipe>, RepError>;
    fn get_recipe_by_short_link(&self, code: &str) -> Result<Option<Recipe>, RepError>;
    fn short_link_exists(&self, code: &str) -> Result<bool, RepError>;
    fn update_recipe(&self, id: &Id, fields: RecipeFields) -> Result<Recipe, RepError>;
    fn delete_recipe_cascade(&self, id: &Id) -> Result<CascadeReport, RepError>;
    /// Newest first.
    fn list_recipes(&self, filter: &RecipeFilter) -> Result<Vec<Recipe>, RepError>;
    fn count_recipes_by_author(&self, author: &Id) -> Result<u64, RepError>;

    fn insert_relation(&self, kind: RelationKind, a: &Id, b: &Id) -> Result<(), RepError>;
    /// Returns whether a row was removed.
    fn remove_relation(&self, kind: RelationKind, a: &Id, b: &Id) -> Result<bool, RepError>;
    fn relation_exists(&self, kind: RelationKind, a: &Id, b: &Id) -> Result<bool, RepError>;
    /// Every `b` related to `a`, in insertion order.
    fn related_ids(&self, kind: RelationKind, a: &Id) -> Result<Vec<Id>, RepError>;
}

pub type Repo = Box<dyn RecipeStore>;
