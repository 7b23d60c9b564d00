use crate::state::{LabState, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

// Two handles to the same stored user compare equal, however obtained.
impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for User {}

impl User {
    pub fn create(state: &mut LabState, name: &str, email: &str) -> UserId {
        let id = state.next_user_id();
        state.users.insert(
            id.clone(),
            User {
                id: id.clone(),
                name: name.to_string(),
                email: email.to_string(),
            },
        );
        id
    }
}
