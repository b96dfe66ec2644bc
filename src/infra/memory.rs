use super::error::RepError;
use super::store::{CascadeReport, RecipeFilter, RecipeStore, RelationKind};
use super::types::{Id, Ingredient, Recipe, RecipeFields, Tag, User};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    tags: Vec<Tag>,
    ingredients: Vec<Ingredient>,
    recipes: Vec<Recipe>,
    relations: Vec<(RelationKind, Id, Id)>,
}

impl Tables {
    fn has_user(&self, id: &Id) -> Result<(), RepError> {
        if !self.users.iter().any(|u| &u.id == id) {
            return Err(RepError::NotFound("user"));
        }
        Ok(())
    }

    /// Both ends of a relation must exist at the moment the row is written.
    fn has_ends(&self, kind: RelationKind, a: &Id, b: &Id) -> Result<(), RepError> {
        self.has_user(a)?;
        match kind {
            RelationKind::Follow => self.has_user(b),
            RelationKind::Favorite | RelationKind::ShoppingCart => {
                if !self.recipes.iter().any(|r| &r.id == b) {
                    return Err(RepError::NotFound("recipe"));
                }
                Ok(())
            }
        }
    }

    fn count_relations(&self, keep: impl Fn(&(RelationKind, Id, Id)) -> bool) -> (u64, u64) {
        let mut favorites = 0;
        let mut carts = 0;
        for rel in self.relations.iter().filter(|rel| !keep(*rel)) {
            match rel.0 {
                RelationKind::Favorite => favorites += 1,
                RelationKind::ShoppingCart => carts += 1,
                RelationKind::Follow => {}
            }
        }
        (favorites, carts)
    }

    /// Drops the recipes matching `doomed` and every favorite or cart row
    /// pointing at them.
    fn remove_recipes(&mut self, doomed: impl Fn(&Recipe) -> bool, report: &mut CascadeReport) {
        let ids: Vec<Id> = self
            .recipes
            .iter()
            .filter(|r| doomed(*r))
            .map(|r| r.id)
            .collect();
        if ids.is_empty() {
            return;
        }
        self.recipes.retain(|r| !ids.contains(&r.id));
        let keep = |rel: &(RelationKind, Id, Id)| {
            rel.0 == RelationKind::Follow || !ids.contains(&rel.2)
        };
        let (favorites, carts) = self.count_relations(keep);
        self.relations.retain(keep);
        report.recipes += ids.len() as u64;
        report.favorites += favorites;
        report.cart_entries += carts;
    }
}

/// Process-local store. A single lock serializes every operation, which is
/// what makes the uniqueness checks below race free.
#[derive(Default)]
pub struct InMemoryRep {
    tables: Mutex<Tables>,
}

impl InMemoryRep {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, RepError> {
        self.tables.lock().map_err(|_| RepError::StoreUnavailable())
    }
}

fn pick<T: Clone>(rows: &[T], ids: &[Id], id_of: impl Fn(&T) -> Id) -> Vec<T> {
    rows.iter()
        .filter(|row| ids.contains(&id_of(row)))
        .cloned()
        .collect()
}

impl RecipeStore for InMemoryRep {
    fn insert_user(&self, user: User) -> Result<User, RepError> {
        let mut t = self.tables()?;
        if t
            .users
            .iter()
            .any(|u| u.username == user.username || u.email == user.email)
        {
            return Err(RepError::AlreadyExists("user"));
        }
        t.users.push(user.clone());
        Ok(user)
    }

    fn get_user(&self, id: &Id) -> Result<Option<User>, RepError> {
        Ok(self.tables()?.users.iter().find(|u| &u.id == id).cloned())
    }

    fn get_users_by_id(&self, ids: &[Id]) -> Result<Vec<User>, RepError> {
        Ok(pick(&self.tables()?.users, ids, |u| u.id))
    }

    fn list_users(&self) -> Result<Vec<User>, RepError> {
        Ok(self.tables()?.users.clone())
    }

    fn set_avatar(&self, id: &Id, avatar: Option<String>) -> Result<User, RepError> {
        let mut t = self.tables()?;
        let user = t
            .users
            .iter_mut()
            .find(|u| &u.id == id)
            .ok_or(RepError::NotFound("user"))?;
        user.avatar = avatar;
        Ok(user.clone())
    }

    fn delete_user_cascade(&self, id: &Id) -> Result<CascadeReport, RepError> {
        let mut t = self.tables()?;
        let mut report = CascadeReport::default();
        let before = t.users.len();
        t.users.retain(|u| &u.id != id);
        report.users = (before - t.users.len()) as u64;

        t.remove_recipes(|r| &r.author == id, &mut report);

        let keep = |rel: &(RelationKind, Id, Id)| {
            &rel.1 != id && !(rel.0 == RelationKind::Follow && &rel.2 == id)
        };
        let (favorites, carts) = t.count_relations(keep);
        let follows = t
            .relations
            .iter()
            .filter(|rel| rel.0 == RelationKind::Follow && !keep(*rel))
            .count() as u64;
        t.relations.retain(keep);
        report.favorites += favorites;
        report.cart_entries += carts;
        report.follows += follows;
        Ok(report)
    }

    fn insert_tag(&self, tag: Tag) -> Result<Tag, RepError> {
        let mut t = self.tables()?;
        if t
            .tags
            .iter()
            .any(|x| x.name == tag.name || x.slug == tag.slug)
        {
            return Err(RepError::AlreadyExists("tag"));
        }
        t.tags.push(tag.clone());
        Ok(tag)
    }

    fn get_tags_by_id(&self, ids: &[Id]) -> Result<Vec<Tag>, RepError> {
        Ok(pick(&self.tables()?.tags, ids, |x| x.id))
    }

    fn list_tags(&self) -> Result<Vec<Tag>, RepError> {
        Ok(self.tables()?.tags.clone())
    }

    fn insert_ingredient(&self, ingredient: Ingredient) -> Result<Ingredient, RepError> {
        let mut t = self.tables()?;
        if t.ingredients.iter().any(|x| {
            x.name == ingredient.name && x.measurement_unit == ingredient.measurement_unit
        }) {
            return Err(RepError::AlreadyExists("ingredient"));
        }
        t.ingredients.push(ingredient.clone());
        Ok(ingredient)
    }

    fn get_ingredients_by_id(&self, ids: &[Id]) -> Result<Vec<Ingredient>, RepError> {
        Ok(pick(&self.tables()?.ingredients, ids, |x| x.id))
    }

    fn search_ingredients(&self, prefix: Option<&str>) -> Result<Vec<Ingredient>, RepError> {
        let prefix = prefix.map(str::to_lowercase);
        let mut found: Vec<Ingredient> = self
            .tables()?
            .ingredients
            .iter()
            .filter(|x| match &prefix {
                Some(p) => x.name.to_lowercase().starts_with(p.as_str()),
                None => true,
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    fn insert_recipe(&self, recipe: Recipe) -> Result<Recipe, RepError> {
        let mut t = self.tables()?;
        t.has_user(&recipe.author)?;
        if t.recipes.iter().any(|r| r.short_link == recipe.short_link) {
            return Err(RepError::ShortLinkTaken(recipe.short_link));
        }
        t.recipes.push(recipe.clone());
        Ok(recipe)
    }

    fn get_recipe(&self, id: &Id) -> Result<Option<Recipe>, RepError> {
        Ok(self.tables()?.recipes.iter().find(|r| &r.id == id).cloned())
    }

    fn get_recipes_by_id(&self, ids: &[Id]) -> Result<Vec<Recipe>, RepError> {
        Ok(pick(&self.tables()?.recipes, ids, |r| r.id))
    }

    fn get_recipe_by_short_link(&self, code: &str) -> Result<Option<Recipe>, RepError> {
        Ok(self
            .tables()?
            .recipes
            .iter()
            .find(|r| r.short_link == code)
            .cloned())
    }

    fn short_link_exists(&self, code: &str) -> Result<bool, RepError> {
        Ok(self.tables()?.recipes.iter().any(|r| r.short_link == code))
    }

    fn update_recipe(&self, id: &Id, fields: RecipeFields) -> Result<Recipe, RepError> {
        let mut t = self.tables()?;
        let recipe = t
            .recipes
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or(RepError::NotFound("recipe"))?;
        recipe.apply(fields);
        Ok(recipe.clone())
    }

    fn delete_recipe_cascade(&self, id: &Id) -> Result<CascadeReport, RepError> {
        let mut t = self.tables()?;
        let mut report = CascadeReport::default();
        t.remove_recipes(|r| &r.id == id, &mut report);
        Ok(report)
    }

    fn list_recipes(&self, filter: &RecipeFilter) -> Result<Vec<Recipe>, RepError> {
        let t = self.tables()?;
        let mut wanted_tags = Vec::with_capacity(filter.tag_slugs.len());
        for slug in &filter.tag_slugs {
            match t.tags.iter().find(|x| &x.slug == slug) {
                Some(tag) => wanted_tags.push(tag.id),
                None => return Ok(Vec::new()),
            }
        }
        let related = |kind: RelationKind, user: &Option<Id>, recipe: &Id| match user {
            Some(user) => t
                .relations
                .iter()
                .any(|rel| rel == &(kind, *user, *recipe)),
            None => true,
        };
        let mut found: Vec<Recipe> = t
            .recipes
            .iter()
            .filter(|r| filter.author.map_or(true, |a| r.author == a))
            .filter(|r| wanted_tags.iter().all(|tag| r.tags.contains(tag)))
            .filter(|r| related(RelationKind::Favorite, &filter.favorited_by, &r.id))
            .filter(|r| related(RelationKind::ShoppingCart, &filter.in_cart_of, &r.id))
            .cloned()
            .collect();
        found.reverse();
        found.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));
        Ok(found)
    }

    fn count_recipes_by_author(&self, author: &Id) -> Result<u64, RepError> {
        Ok(self
            .tables()?
            .recipes
            .iter()
            .filter(|r| &r.author == author)
            .count() as u64)
    }

    fn insert_relation(&self, kind: RelationKind, a: &Id, b: &Id) -> Result<(), RepError> {
        let mut t = self.tables()?;
        t.has_ends(kind, a, b)?;
        let row = (kind, *a, *b);
        if t.relations.contains(&row) {
            return Err(RepError::DuplicateRelation(kind));
        }
        t.relations.push(row);
        Ok(())
    }

    fn remove_relation(&self, kind: RelationKind, a: &Id, b: &Id) -> Result<bool, RepError> {
        let mut t = self.tables()?;
        let before = t.relations.len();
        t.relations.retain(|rel| rel != &(kind, *a, *b));
        Ok(t.relations.len() != before)
    }

    fn relation_exists(&self, kind: RelationKind, a: &Id, b: &Id) -> Result<bool, RepError> {
        Ok(self.tables()?.relations.contains(&(kind, *a, *b)))
    }

    fn related_ids(&self, kind: RelationKind, a: &Id) -> Result<Vec<Id>, RepError> {
        Ok(self
            .tables()?
            .relations
            .iter()
            .filter(|rel| rel.0 == kind && &rel.1 == a)
            .map(|rel| rel.2)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::types::IngredientLine;

    fn user(name: &str) -> User {
        User {
            id: Id::new(),
            username: name.to_string(),
            email: format!("{name}@foodgram.test"),
            first_name: name.to_string(),
            last_name: "Test".to_string(),
            avatar: None,
        }
    }

    fn recipe(author: &Id, code: &str, ingredient: &Id) -> Recipe {
        Recipe::new(
            *author,
            code.to_string(),
            RecipeFields {
                name: "Soup".to_string(),
                image: None,
                text: "Boil".to_string(),
                cooking_time: 10,
                tags: vec![],
                ingredients: vec![IngredientLine {
                    ingredient: *ingredient,
                    amount: 1,
                }],
            },
        )
    }

    #[test]
    #[should_panic(expected = "AlreadyExists")]
    fn test_insert_user_duplicate_username() {
        let repo = InMemoryRep::new();
        repo.insert_user(user("alice")).unwrap();
        let mut again = user("alice");
        again.email = "other@foodgram.test".to_string();
        repo.insert_user(again).unwrap();
    }

    #[test]
    #[should_panic(expected = "ShortLinkTaken")]
    fn test_insert_recipe_duplicate_short_link() {
        let repo = InMemoryRep::new();
        let author = repo.insert_user(user("alice")).unwrap();
        let ing = Id::new();
        repo.insert_recipe(recipe(&author.id, "abc123", &ing)).unwrap();
        repo.insert_recipe(recipe(&author.id, "abc123", &ing)).unwrap();
    }

    #[test]
    fn test_delete_user_cascade_removes_everything_pointing_at_user() {
        let repo = InMemoryRep::new();
        let alice = repo.insert_user(user("alice")).unwrap();
        let bob = repo.insert_user(user("bob")).unwrap();
        let ing = Id::new();
        let soup = repo.insert_recipe(recipe(&alice.id, "aaaaaa", &ing)).unwrap();
        let stew = repo.insert_recipe(recipe(&bob.id, "bbbbbb", &ing)).unwrap();
        repo.insert_relation(RelationKind::Favorite, &bob.id, &soup.id)
            .unwrap();
        repo.insert_relation(RelationKind::ShoppingCart, &alice.id, &stew.id)
            .unwrap();
        repo.insert_relation(RelationKind::Follow, &bob.id, &alice.id)
            .unwrap();
        repo.insert_relation(RelationKind::Follow, &alice.id, &bob.id)
            .unwrap();

        let report = repo.delete_user_cascade(&alice.id).unwrap();

        assert_eq!(
            report,
            CascadeReport {
                users: 1,
                recipes: 1,
                favorites: 1,
                cart_entries: 1,
                follows: 2,
            }
        );
        assert!(repo.get_recipe(&soup.id).unwrap().is_none());
        assert!(repo.get_recipe(&stew.id).unwrap().is_some());
        assert!(repo
            .related_ids(RelationKind::Follow, &bob.id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_search_ingredients_prefix_is_case_insensitive() {
        let repo = InMemoryRep::new();
        for (name, unit) in [("Sugar", "g"), ("salt", "g"), ("Flour", "g")] {
            repo.insert_ingredient(Ingredient {
                id: Id::new(),
                name: name.to_string(),
                measurement_unit: unit.to_string(),
            })
            .unwrap();
        }
        let found = repo.search_ingredients(Some("S")).unwrap();
        let names: Vec<&str> = found.iter().map(|x| x.name.as_str()).collect();
        assert_eq!(names, vec!["Sugar", "salt"]);
        assert_eq!(repo.search_ingredients(None).unwrap().len(), 3);
    }
}
