use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// One row of a pair relation collection (`favorites`, `shopping_carts`,
/// `follows`). `user` is the owner, `target` the recipe or the followee.
#[derive(Debug, Deserialize, Serialize)]
pub struct RelationDoc {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user: ObjectId,
    pub target: ObjectId,
}

impl RelationDoc {
    pub fn new(user: ObjectId, target: ObjectId) -> Self {
        RelationDoc {
            id: None,
            user,
            target,
        }
    }
}
