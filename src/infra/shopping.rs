use super::error::RepError;
use super::store::{RecipeStore, RelationKind};
use super::types::{Id, Ingredient};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShoppingItem {
    pub name: String,
    pub measurement_unit: String,
    pub amount: u64,
}

/// Ingredient totals over every recipe in one user's cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShoppingList {
    pub username: String,
    pub recipe_count: usize,
    /// Ordered by name, then unit.
    pub items: Vec<ShoppingItem>,
}

impl fmt::Display for ShoppingList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Shopping list for {}", self.username)?;
        writeln!(f)?;
        writeln!(f, "Recipes in list: {}", self.recipe_count)?;
        writeln!(f)?;
        writeln!(f, "Ingredients to buy:")?;
        writeln!(f)?;
        for item in &self.items {
            writeln!(f, "{} - {} {}", item.name, item.amount, item.measurement_unit)?;
        }
        Ok(())
    }
}

pub fn build_shopping_list(store: &dyn RecipeStore, user: &Id) -> Result<ShoppingList, RepError> {
    let owner = store.get_user(user)?.ok_or(RepError::NotFound("user"))?;
    let carted = store.related_ids(RelationKind::ShoppingCart, user)?;
    let recipes = store.get_recipes_by_id(&carted)?;

    let mut ingredient_ids: Vec<Id> = recipes
        .iter()
        .flat_map(|r| r.ingredients.iter().map(|l| l.ingredient))
        .collect();
    ingredient_ids.sort();
    ingredient_ids.dedup();
    let ingredients: HashMap<Id, Ingredient> = store
        .get_ingredients_by_id(&ingredient_ids)?
        .into_iter()
        .map(|i| (i.id, i))
        .collect();

    let mut totals: BTreeMap<(&str, &str), u64> = BTreeMap::new();
    for line in recipes.iter().flat_map(|r| r.ingredients.iter()) {
        match ingredients.get(&line.ingredient) {
            Some(i) => {
                *totals
                    .entry((i.name.as_str(), i.measurement_unit.as_str()))
                    .or_insert(0) += u64::from(line.amount);
            }
            None => {
                warn!(ingredient = %line.ingredient, "cart line points at a missing ingredient")
            }
        }
    }

    let items = totals
        .into_iter()
        .map(|((name, unit), amount)| ShoppingItem {
            name: name.to_string(),
            measurement_unit: unit.to_string(),
            amount,
        })
        .collect::<Vec<_>>();
    debug!(user = %user, recipes = recipes.len(), items = items.len(), "shopping list built");

    Ok(ShoppingList {
        username: owner.username,
        recipe_count: recipes.len(),
        items,
    })
}

/// Renders the cart of `user` as the downloadable plain-text report.
pub fn aggregate_shopping_list(store: &dyn RecipeStore, user: &Id) -> Result<String, RepError> {
    Ok(build_shopping_list(store, user)?.to_string())
}
