use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub capacity: Option<i64>,
    #[serde(default)]
    pub equipment: Vec<String>,
    pub location: Option<String>,
}
