use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

pub const DEFAULT_PERSONA: &str = "default";
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// A named answering style for conversational replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub description: String,
}

impl Persona {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            temperature: temperature.clamp(0.0, 2.0),
            description: String::new(),
        }
    }

    fn described(mut self, description: &str) -> Self {
        self.description = description.to_owned();
        self
    }
}

/// In-memory persona table. Roles introduced by the classifier live until restart.
#[derive(Debug)]
pub struct PersonaRegistry {
    roles: RwLock<HashMap<String, Persona>>,
}

impl Default for PersonaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PersonaRegistry {
    pub fn new() -> Self {
        let builtin = [
            Persona::new(DEFAULT_PERSONA, "You are a helpful assistant. Respond succinctly.", 0.7)
                .described("Default fallback role."),
            Persona::new("friendly", "You are a friendly, upbeat assistant.", 0.9)
                .described("Cheerful persona."),
            Persona::new("tech_expert", "You are a highly technical expert.", 0.6)
                .described("Deep knowledge persona."),
        ];
        Self {
            roles: RwLock::new(builtin.into_iter().map(|p| (p.name.clone(), p)).collect()),
        }
    }

    /// The named persona, or the default one when the name is unknown.
    pub fn resolve(&self, name: &str) -> Persona {
        let roles = self.roles.read().unwrap_or_else(PoisonError::into_inner);
        roles
            .get(name.trim())
            .or_else(|| roles.get(DEFAULT_PERSONA))
            .cloned()
            .unwrap_or_else(|| Persona::new(DEFAULT_PERSONA, "You are a helpful assistant.", DEFAULT_TEMPERATURE))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.roles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name.trim())
    }

    pub fn register(&self, persona: Persona) {
        tracing::info!(persona = %persona.name, "persona registered");
        self.roles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(persona.name.clone(), persona);
    }

    /// Register `role` from classifier parameters (`new_role_prompt`, optional
    /// `role_temperature`). Existing roles are never overwritten.
    pub fn register_from_hint(&self, role: &str, params: &serde_json::Value) -> Option<Persona> {
        let role = role.trim();
        if role.is_empty() || self.contains(role) {
            return None;
        }
        let prompt = params
            .get("new_role_prompt")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())?;
        let temperature = params
            .get("role_temperature")
            .and_then(|v| v.as_f64())
            .map(|t| t as f32)
            .unwrap_or(DEFAULT_TEMPERATURE);
        let persona = Persona::new(role, prompt, temperature).described("Introduced in conversation.");
        self.register(persona.clone());
        Some(persona)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_personas() {
        let reg = PersonaRegistry::new();
        for name in ["default", "friendly", "tech_expert"] {
            assert!(reg.contains(name), "missing {name}");
        }
        assert!(!reg.contains("Batman"));
        assert_eq!(reg.resolve("friendly").temperature, 0.9);
    }

    #[test]
    fn unknown_role_falls_back_to_default() {
        let reg = PersonaRegistry::new();
        assert_eq!(reg.resolve("Batman").name, DEFAULT_PERSONA);
    }

    #[test]
    fn hint_registers_new_role_once() {
        let reg = PersonaRegistry::new();
        let params = json!({"new_role_prompt": "You are Batman.", "role_temperature": 0.5});
        let p = reg.register_from_hint("Batman", &params).unwrap();
        assert_eq!(p.system_prompt, "You are Batman.");
        assert_eq!(p.temperature, 0.5);
        assert_eq!(reg.resolve("Batman").name, "Batman");
        assert!(reg.register_from_hint("Batman", &json!({"new_role_prompt": "other"})).is_none());
        assert_eq!(reg.resolve("Batman").system_prompt, "You are Batman.");
    }

    #[test]
    fn hint_without_prompt_is_ignored() {
        let reg = PersonaRegistry::new();
        assert!(reg.register_from_hint("Robin", &json!({})).is_none());
        assert!(reg.register_from_hint("default", &json!({"new_role_prompt": "x"})).is_none());
        assert!(!reg.contains("Robin"));
    }

    #[test]
    fn temperature_is_clamped() {
        assert_eq!(Persona::new("hot", "p", 9.0).temperature, 2.0);
    }
}
