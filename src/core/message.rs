use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Role name on the provider side. System turns never reach the provider;
    /// the system instruction travels out-of-band.
    pub fn to_provider_role(self) -> Option<&'static str> {
        match self {
            Role::User => Some("user"),
            Role::Assistant => Some("model"),
            Role::System => None,
        }
    }

    pub fn is_user(self) -> bool {
        self == Role::User
    }

    pub fn is_assistant(self) -> bool {
        self == Role::Assistant
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(format!("invalid turn role: {value}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn is_user(&self) -> bool {
        self.role.is_user()
    }

    pub fn is_assistant(&self) -> bool {
        self.role.is_assistant()
    }
}

/// Drop `system` turns; the instruction is carried separately.
pub fn conversation_turns(turns: &[Turn]) -> Vec<Turn> {
    turns
        .iter()
        .filter(|turn| turn.role != Role::System)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_maps_to_model_role() {
        assert_eq!(Role::Assistant.to_provider_role(), Some("model"));
        assert_eq!(Role::User.to_provider_role(), Some("user"));
        assert_eq!(Role::System.to_provider_role(), None);
    }

    #[test]
    fn invalid_role_strings_are_rejected() {
        assert!(Role::try_from("model").is_err());
    }

    #[test]
    fn turns_round_trip_through_json_role_names() {
        let turn: Turn = serde_json::from_str(r#"{"role":"assistant","content":"Hey"}"#)
            .expect("valid turn");
        assert_eq!(turn, Turn::assistant("Hey"));
        let encoded = serde_json::to_string(&Turn::system("be brief")).expect("encode");
        assert_eq!(encoded, r#"{"role":"system","content":"be brief"}"#);
    }

    #[test]
    fn conversation_turns_skips_system_entries() {
        let turns = vec![
            Turn::system("rules"),
            Turn::user("Hi"),
            Turn::assistant("Hey"),
        ];
        let filtered = conversation_turns(&turns);
        assert_eq!(filtered, vec![Turn::user("Hi"), Turn::assistant("Hey")]);
    }
}
