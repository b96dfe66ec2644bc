use super::types::RelationDoc;
use crate::infra::error::RepError;
use crate::infra::store::{CascadeReport, RecipeFilter, RecipeStore, RelationKind};
use crate::infra::types::{Id, Ingredient, Recipe, RecipeFields, Tag, User};
use mongodb::{
    bson::{doc, oid::ObjectId, Document},
    error::{Error as mongoError, ErrorKind, WriteFailure},
    options::{FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument},
    sync::{Client, ClientSession, Collection},
    IndexModel,
};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

const DUPLICATE_KEY: i32 = 11000;

fn is_duplicate_key(err: &mongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY
    )
}

fn collect<T>(cursor: mongodb::sync::Cursor<T>) -> Result<Vec<T>, RepError>
where
    T: DeserializeOwned + Unpin + Send + Sync,
{
    Ok(cursor.collect::<Result<Vec<T>, mongoError>>()?)
}

fn escape_regex(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn unique_index(keys: Document) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

/// MongoDB backed store. Uniqueness rules live in unique indexes and cascades
/// run inside multi-document transactions, so the server must be a replica set.
pub struct MongoRep {
    client: Client,
    pub users: Collection<User>,
    pub tags: Collection<Tag>,
    pub ingredients: Collection<Ingredient>,
    pub recipes: Collection<Recipe>,
    pub favorites: Collection<RelationDoc>,
    pub shopping_carts: Collection<RelationDoc>,
    pub follows: Collection<RelationDoc>,
}

impl MongoRep {
    pub fn init(uri: &str, database: &str) -> Result<Self, RepError> {
        let client = Client::with_uri_str(uri)?;
        let db = client.database(database);
        let rep = MongoRep {
            users: db.collection("users"),
            tags: db.collection("tags"),
            ingredients: db.collection("ingredients"),
            recipes: db.collection("recipes"),
            favorites: db.collection(RelationKind::Favorite.collection()),
            shopping_carts: db.collection(RelationKind::ShoppingCart.collection()),
            follows: db.collection(RelationKind::Follow.collection()),
            client,
        };
        rep.ensure_indexes()?;
        info!(database, "connected to mongodb");
        Ok(rep)
    }

    fn ensure_indexes(&self) -> Result<(), RepError> {
        self.users
            .create_index(unique_index(doc! {"username": 1}), None)?;
        self.users.create_index(unique_index(doc! {"email": 1}), None)?;
        self.tags.create_index(unique_index(doc! {"name": 1}), None)?;
        self.tags.create_index(unique_index(doc! {"slug": 1}), None)?;
        self.ingredients
            .create_index(unique_index(doc! {"name": 1, "measurement_unit": 1}), None)?;
        self.recipes
            .create_index(unique_index(doc! {"short_link": 1}), None)?;
        for kind in [
            RelationKind::Favorite,
            RelationKind::ShoppingCart,
            RelationKind::Follow,
        ] {
            let relations = self.relations(kind);
            relations.create_index(unique_index(doc! {"user": 1, "target": 1}), None)?;
            relations.create_index(IndexModel::builder().keys(doc! {"target": 1}).build(), None)?;
        }
        Ok(())
    }

    fn relations(&self, kind: RelationKind) -> &Collection<RelationDoc> {
        match kind {
            RelationKind::Favorite => &self.favorites,
            RelationKind::ShoppingCart => &self.shopping_carts,
            RelationKind::Follow => &self.follows,
        }
    }

    fn in_transaction<T>(
        &self,
        work: impl FnOnce(&mut ClientSession) -> Result<T, RepError>,
    ) -> Result<T, RepError> {
        let mut session = self.client.start_session(None)?;
        session.start_transaction(None)?;
        match work(&mut session) {
            Ok(value) => {
                session.commit_transaction()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = session.abort_transaction() {
                    warn!(error = %abort, "failed to abort transaction");
                }
                Err(e)
            }
        }
    }

    /// Bumps `relation_rev` on the document `id` inside `session`. A cascade
    /// deleting the same document in a concurrent transaction then hits a
    /// write conflict instead of missing the row written next to it.
    fn touch<T>(
        &self,
        collection: &Collection<T>,
        id: &Id,
        what: &'static str,
        session: &mut ClientSession,
    ) -> Result<(), RepError> {
        let result = collection.update_one_with_session(
            doc! {"_id": *id},
            doc! {"$inc": {"relation_rev": 1}},
            None,
            session,
        )?;
        if result.matched_count == 0 {
            return Err(RepError::NotFound(what));
        }
        Ok(())
    }

    fn find_by_ids<T>(&self, collection: &Collection<T>, ids: &[Id]) -> Result<Vec<T>, RepError>
    where
        T: DeserializeOwned + Unpin + Send + Sync,
    {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        collect(collection.find(doc! {"_id": {"$in": ids.to_vec()}}, None)?)
    }
}

impl RecipeStore for MongoRep {
    fn insert_user(&self, user: User) -> Result<User, RepError> {
        match self.users.insert_one(&user, None) {
            Ok(_) => Ok(user),
            Err(e) if is_duplicate_key(&e) => Err(RepError::AlreadyExists("user")),
            Err(e) => Err(e.into()),
        }
    }

    fn get_user(&self, id: &Id) -> Result<Option<User>, RepError> {
        Ok(self.users.find_one(doc! {"_id": *id}, None)?)
    }

    fn get_users_by_id(&self, ids: &[Id]) -> Result<Vec<User>, RepError> {
        self.find_by_ids(&self.users, ids)
    }

    fn list_users(&self) -> Result<Vec<User>, RepError> {
        let options = FindOptions::builder().sort(doc! {"username": 1}).build();
        collect(self.users.find(None, options)?)
    }

    fn set_avatar(&self, id: &Id, avatar: Option<String>) -> Result<User, RepError> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        self.users
            .find_one_and_update(doc! {"_id": *id}, doc! {"$set": {"avatar": avatar}}, options)?
            .ok_or(RepError::NotFound("user"))
    }

    fn delete_user_cascade(&self, id: &Id) -> Result<CascadeReport, RepError> {
        let id = *id;
        self.in_transaction(|session| {
            let authored: Vec<ObjectId> = {
                let mut cursor =
                    self.recipes
                        .find_with_session(doc! {"author": id}, None, session)?;
                cursor
                    .iter(session)
                    .map(|r| r.map(|r| r.id))
                    .collect::<Result<_, _>>()?
            };
            let mut report = CascadeReport::default();
            report.recipes = self
                .recipes
                .delete_many_with_session(doc! {"author": id}, None, session)?
                .deleted_count;
            let owned_or_authored = doc! {"$or": [
                {"user": id},
                {"target": {"$in": authored}},
            ]};
            report.favorites = self
                .favorites
                .delete_many_with_session(owned_or_authored.clone(), None, session)?
                .deleted_count;
            report.cart_entries = self
                .shopping_carts
                .delete_many_with_session(owned_or_authored, None, session)?
                .deleted_count;
            report.follows = self
                .follows
                .delete_many_with_session(
                    doc! {"$or": [{"user": id}, {"target": id}]},
                    None,
                    session,
                )?
                .deleted_count;
            report.users = self
                .users
                .delete_one_with_session(doc! {"_id": id}, None, session)?
                .deleted_count;
            Ok(report)
        })
    }

    fn insert_tag(&self, tag: Tag) -> Result<Tag, RepError> {
        match self.tags.insert_one(&tag, None) {
            Ok(_) => Ok(tag),
            Err(e) if is_duplicate_key(&e) => Err(RepError::AlreadyExists("tag")),
            Err(e) => Err(e.into()),
        }
    }

    fn get_tags_by_id(&self, ids: &[Id]) -> Result<Vec<Tag>, RepError> {
        self.find_by_ids(&self.tags, ids)
    }

    fn list_tags(&self) -> Result<Vec<Tag>, RepError> {
        let options = FindOptions::builder().sort(doc! {"name": 1}).build();
        collect(self.tags.find(None, options)?)
    }

    fn insert_ingredient(&self, ingredient: Ingredient) -> Result<Ingredient, RepError> {
        match self.ingredients.insert_one(&ingredient, None) {
            Ok(_) => Ok(ingredient),
            Err(e) if is_duplicate_key(&e) => Err(RepError::AlreadyExists("ingredient")),
            Err(e) => Err(e.into()),
        }
    }

    fn get_ingredients_by_id(&self, ids: &[Id]) -> Result<Vec<Ingredient>, RepError> {
        self.find_by_ids(&self.ingredients, ids)
    }

    fn search_ingredients(&self, prefix: Option<&str>) -> Result<Vec<Ingredient>, RepError> {
        let filter = prefix.map(|p| {
            doc! {"name": {"$regex": format!("^{}", escape_regex(p)), "$options": "i"}}
        });
        let options = FindOptions::builder().sort(doc! {"name": 1}).build();
        collect(self.ingredients.find(filter, options)?)
    }

    fn insert_recipe(&self, recipe: Recipe) -> Result<Recipe, RepError> {
        self.in_transaction(|session| {
            self.touch(&self.users, &recipe.author, "user", session)?;
            match self.recipes.insert_one_with_session(&recipe, None, session) {
                Ok(_) => Ok(()),
                Err(e) if is_duplicate_key(&e) => {
                    Err(RepError::ShortLinkTaken(recipe.short_link.clone()))
                }
                Err(e) => Err(e.into()),
            }
        })?;
        Ok(recipe)
    }

    fn get_recipe(&self, id: &Id) -> Result<Option<Recipe>, RepError> {
        Ok(self.recipes.find_one(doc! {"_id": *id}, None)?)
    }

    fn get_recipes_by_id(&self, ids: &[Id]) -> Result<Vec<Recipe>, RepError> {
        self.find_by_ids(&self.recipes, ids)
    }

    fn get_recipe_by_short_link(&self, code: &str) -> Result<Option<Recipe>, RepError> {
        Ok(self.recipes.find_one(doc! {"short_link": code}, None)?)
    }

    fn short_link_exists(&self, code: &str) -> Result<bool, RepError> {
        Ok(self
            .recipes
            .count_documents(doc! {"short_link": code}, None)?
            > 0)
    }

    fn update_recipe(&self, id: &Id, fields: RecipeFields) -> Result<Recipe, RepError> {
        let mut recipe = self.get_recipe(id)?.ok_or(RepError::NotFound("recipe"))?;
        recipe.apply(fields);
        let result = self
            .recipes
            .replace_one(doc! {"_id": *id}, &recipe, None)?;
        if result.matched_count == 0 {
            return Err(RepError::NotFound("recipe"));
        }
        Ok(recipe)
    }

    fn delete_recipe_cascade(&self, id: &Id) -> Result<CascadeReport, RepError> {
        let id = *id;
        self.in_transaction(|session| {
            let mut report = CascadeReport::default();
            report.recipes = self
                .recipes
                .delete_one_with_session(doc! {"_id": id}, None, session)?
                .deleted_count;
            report.favorites = self
                .favorites
                .delete_many_with_session(doc! {"target": id}, None, session)?
                .deleted_count;
            report.cart_entries = self
                .shopping_carts
                .delete_many_with_session(doc! {"target": id}, None, session)?
                .deleted_count;
            Ok(report)
        })
    }

    fn list_recipes(&self, filter: &RecipeFilter) -> Result<Vec<Recipe>, RepError> {
        let mut query = Document::new();
        if let Some(author) = filter.author {
            query.insert("author", author);
        }
        if !filter.tag_slugs.is_empty() {
            let mut slugs = filter.tag_slugs.clone();
            slugs.sort();
            slugs.dedup();
            let tags = collect(self.tags.find(doc! {"slug": {"$in": slugs.clone()}}, None)?)?;
            if tags.len() != slugs.len() {
                return Ok(Vec::new());
            }
            let ids: Vec<ObjectId> = tags.into_iter().map(|t| t.id).collect();
            query.insert("tags", doc! {"$all": ids});
        }
        let mut clauses = Vec::new();
        for (kind, user) in [
            (RelationKind::Favorite, filter.favorited_by),
            (RelationKind::ShoppingCart, filter.in_cart_of),
        ] {
            if let Some(user) = user {
                let ids = self.related_ids(kind, &user)?;
                clauses.push(doc! {"_id": {"$in": ids}});
            }
        }
        if !clauses.is_empty() {
            query.insert("$and", clauses);
        }
        let options = FindOptions::builder()
            .sort(doc! {"pub_date": -1, "_id": -1})
            .build();
        collect(self.recipes.find(query, options)?)
    }

    fn count_recipes_by_author(&self, author: &Id) -> Result<u64, RepError> {
        Ok(self
            .recipes
            .count_documents(doc! {"author": *author}, None)?)
    }

    fn insert_relation(&self, kind: RelationKind, a: &Id, b: &Id) -> Result<(), RepError> {
        self.in_transaction(|session| {
            self.touch(&self.users, a, "user", session)?;
            match kind {
                RelationKind::Follow => self.touch(&self.users, b, "user", session)?,
                RelationKind::Favorite | RelationKind::ShoppingCart => {
                    self.touch(&self.recipes, b, "recipe", session)?
                }
            }
            match self
                .relations(kind)
                .insert_one_with_session(RelationDoc::new(*a, *b), None, session)
            {
                Ok(_) => Ok(()),
                Err(e) if is_duplicate_key(&e) => Err(RepError::DuplicateRelation(kind)),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn remove_relation(&self, kind: RelationKind, a: &Id, b: &Id) -> Result<bool, RepError> {
        let result = self
            .relations(kind)
            .delete_one(doc! {"user": *a, "target": *b}, None)?;
        Ok(result.deleted_count > 0)
    }

    fn relation_exists(&self, kind: RelationKind, a: &Id, b: &Id) -> Result<bool, RepError> {
        Ok(self
            .relations(kind)
            .count_documents(doc! {"user": *a, "target": *b}, None)?
            > 0)
    }

    fn related_ids(&self, kind: RelationKind, a: &Id) -> Result<Vec<Id>, RepError> {
        let options = FindOptions::builder().sort(doc! {"_id": 1}).build();
        let rows = collect(self.relations(kind).find(doc! {"user": *a}, options)?)?;
        Ok(rows.into_iter().map(|r| r.target).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::integrity::tests::{add_ingredient, add_tag, add_user, draft};
    use crate::infra::integrity::{create_recipe, create_relation};
    use crate::infra::shopping::build_shopping_list;

    fn init_repo(database: &str) -> MongoRep {
        let rep = MongoRep::init("mongodb://localhost:27017/", database).unwrap();
        rep.client.database(database).drop(None).unwrap();
        rep.ensure_indexes().unwrap();
        rep
    }

    #[test]
    fn test_escape_regex() {
        assert_eq!(escape_regex("a.b*"), "a\\.b\\*");
        assert_eq!(escape_regex("Сахар"), "Сахар");
    }

    #[test]
    #[ignore = "needs a MongoDB replica set on localhost:27017"]
    #[should_panic(expected = "DuplicateRelation")]
    fn test_insert_relation_duplicate_follow() {
        let rep = init_repo("foodgram_test_follow");
        let alice = add_user(&rep, "alice");
        let bob = add_user(&rep, "bob");
        create_relation(&rep, RelationKind::Follow, &alice.id, &bob.id).unwrap();
        create_relation(&rep, RelationKind::Follow, &alice.id, &bob.id).unwrap();
    }

    #[test]
    #[ignore = "needs a MongoDB replica set on localhost:27017"]
    fn test_delete_recipe_cascade_passes() {
        let rep = init_repo("foodgram_test_cascade");
        let alice = add_user(&rep, "alice");
        let tag = add_tag(&rep, "breakfast");
        let flour = add_ingredient(&rep, "Flour", "g");
        let recipe = create_recipe(&rep, &alice.id, draft(&[&tag], &[(&flour, 200)])).unwrap();
        create_relation(&rep, RelationKind::ShoppingCart, &alice.id, &recipe.id).unwrap();
        assert_eq!(build_shopping_list(&rep, &alice.id).unwrap().items.len(), 1);

        let report = rep.delete_recipe_cascade(&recipe.id).unwrap();

        assert_eq!(report.recipes, 1);
        assert_eq!(report.cart_entries, 1);
        assert!(build_shopping_list(&rep, &alice.id).unwrap().items.is_empty());
    }

    #[test]
    #[ignore = "needs a MongoDB replica set on localhost:27017"]
    fn test_list_recipes_by_tag_passes() {
        let rep = init_repo("foodgram_test_filter");
        let alice = add_user(&rep, "alice");
        let breakfast = add_tag(&rep, "breakfast");
        let dinner = add_tag(&rep, "dinner");
        let flour = add_ingredient(&rep, "Flour", "g");
        create_recipe(&rep, &alice.id, draft(&[&breakfast], &[(&flour, 1)])).unwrap();
        create_recipe(&rep, &alice.id, draft(&[&breakfast, &dinner], &[(&flour, 2)])).unwrap();
        let filter = RecipeFilter {
            tag_slugs: vec!["dinner".to_string()],
            ..RecipeFilter::default()
        };
        let found = rep.list_recipes(&filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].ingredients[0].amount, 2);
    }

    #[test]
    #[ignore = "needs a MongoDB replica set on localhost:27017"]
    #[should_panic(expected = "NotFound(\"recipe\")")]
    fn test_insert_relation_for_deleted_recipe() {
        let rep = init_repo("foodgram_test_orphan");
        let alice = add_user(&rep, "alice");
        let tag = add_tag(&rep, "breakfast");
        let flour = add_ingredient(&rep, "Flour", "g");
        let recipe = create_recipe(&rep, &alice.id, draft(&[&tag], &[(&flour, 1)])).unwrap();
        rep.delete_recipe_cascade(&recipe.id).unwrap();
        rep.insert_relation(RelationKind::ShoppingCart, &alice.id, &recipe.id)
            .unwrap();
    }
}
