use crate::runner::ScriptRunner;
use crate::script;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use policy_api::{PolicyBackend, PolicyTarget, PolicyValue};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Registry-backed policy target; every primitive is one PowerShell run.
pub struct RegistryBackend {
    pub(crate) target: PolicyTarget,
    pub(crate) runner: Arc<dyn ScriptRunner>,
}

impl RegistryBackend {
    pub fn new(target: PolicyTarget, runner: Arc<dyn ScriptRunner>) -> Self {
        Self { target, runner }
    }

    async fn run(&self, op: &str, script: String) -> Result<String> {
        debug!(
            target: "policy_windows::backend",
            backend = %self.target.id,
            op,
            "invoking registry primitive"
        );
        self.runner
            .run(&script)
            .await
            .with_context(|| format!("{} {} failed", self.target.display_name, op))
    }
}

pub(crate) fn value_from_json(raw: &Value) -> Result<Option<PolicyValue>> {
    match raw {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(PolicyValue::String(s.clone()))),
        Value::Number(n) => {
            let wide = n
                .as_u64()
                .or_else(|| n.as_i64().map(|v| v as u32 as u64))
                .ok_or_else(|| anyhow!("unsupported registry number: {}", n))?;
            let value = u32::try_from(wide)
                .map_err(|_| anyhow!("registry number out of DWORD range: {}", wide))?;
            Ok(Some(PolicyValue::Dword(value)))
        }
        other => Err(anyhow!("unsupported registry value: {}", other)),
    }
}

fn parse_json(op: &str, stdout: &str) -> Result<Value> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(trimmed)
        .with_context(|| format!("failed to parse {} output: {}", op, trimmed))
}

#[async_trait]
impl PolicyBackend for RegistryBackend {
    fn target(&self) -> &PolicyTarget {
        &self.target
    }

    async fn ensure_key(&self, key: &str) -> Result<()> {
        let path = self.target.key_path(key);
        self.run("ensure_key", script::ensure_key(&path)).await?;
        Ok(())
    }

    async fn set_value(&self, key: &str, name: &str, value: PolicyValue) -> Result<()> {
        let path = self.target.key_path(key);
        self.run("set_value", script::set_value(&path, name, &value))
            .await?;
        Ok(())
    }

    async fn get_value(&self, key: &str, name: &str) -> Result<Option<PolicyValue>> {
        let path = self.target.key_path(key);
        let stdout = self.run("get_value", script::get_value(&path, name)).await?;
        value_from_json(&parse_json("get_value", &stdout)?)
    }

    async fn list_values(&self, key: &str) -> Result<Vec<(String, PolicyValue)>> {
        let path = self.target.key_path(key);
        let stdout = self.run("list_values", script::list_values(&path)).await?;
        let raw = parse_json("list_values", &stdout)?;
        let object = match raw {
            Value::Object(map) => map,
            Value::Null => return Ok(Vec::new()),
            other => return Err(anyhow!("list_values returned non-object: {}", other)),
        };

        let mut values = Vec::with_capacity(object.len());
        for (name, raw) in object {
            if name.is_empty() {
                continue;
            }
            match value_from_json(&raw) {
                Ok(Some(value)) => values.push((name, value)),
                Ok(None) => {}
                Err(err) => warn!(
                    target: "policy_windows::backend",
                    backend = %self.target.id,
                    value = %name,
                    error = %err,
                    "skipping unsupported registry value"
                ),
            }
        }
        Ok(values)
    }

    async fn delete_key(&self, key: &str) -> Result<()> {
        let path = self.target.key_path(key);
        self.run("delete_key", script::delete_key(&path)).await?;
        Ok(())
    }
}
