//! Registry of [`FormDescriptor`]s available to `SuspendForInput` steps.
//!
//! Same shape as [`crate::agents::AgentRegistry`]: the step only carries a
//! `form_id`, so the engine needs somewhere to resolve it to the fields the
//! Conversation Manager validates against (spec.md §4.10).

use std::collections::HashMap;
use std::sync::Arc;

use archflow_schemas::FormDescriptor;
use tokio::sync::RwLock;

use crate::error::EngineError;

#[derive(Default)]
pub struct FormRegistry {
    forms: RwLock<HashMap<String, Arc<FormDescriptor>>>,
}

impl FormRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, form: FormDescriptor) {
        self.forms.write().await.insert(form.form_id.clone(), Arc::new(form));
    }

    pub async fn get(&self, form_id: &str) -> Result<Arc<FormDescriptor>, EngineError> {
        self.forms
            .read()
            .await
            .get(form_id)
            .cloned()
            .ok_or_else(|| EngineError::Inner(archflow_schemas::ArchflowError::not_found(format!(
                "form '{form_id}' is not registered"
            ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archflow_schemas::{Field, FieldType, FormField};

    #[tokio::test]
    async fn register_then_get_round_trips() {
        let registry = FormRegistry::new();
        registry
            .register(FormDescriptor {
                form_id: "welcome-form".into(),
                title: "Welcome".into(),
                fields: vec![FormField {
                    name: "name".into(),
                    label: "Your name".into(),
                    field: Field::new(FieldType::String).required(),
                    options: vec![],
                }],
            })
            .await;

        assert_eq!(registry.get("welcome-form").await.unwrap().title, "Welcome");
    }
}
