//! # Agents and Capabilities
//!
//! An [`AgentDefinition`] bundles instructions, the capabilities the model may
//! invoke, and an optional model override. Definitions are immutable once
//! built and are shared as `Arc<AgentDefinition>`.
//!
//! Capabilities are described explicitly at construction time: a name, a
//! JSON parameter schema and a handler. The shared context map is always
//! passed to the handler as its own argument and is never part of the
//! schema shown to the model.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::provider::ToolSchema;

/// Shared context map threaded through a conversation
pub type ContextVariables = serde_json::Map<String, Value>;

/// Parameter name reserved for the implicit context argument
pub const CONTEXT_PARAMETER: &str = "context_variables";

const DEFAULT_INSTRUCTIONS: &str = "You are a helpful agent.";

/// Agent instructions: literal text or a function of the context map
#[derive(Clone)]
pub enum Instructions {
    Fixed(String),
    Templated(Arc<dyn Fn(&ContextVariables) -> String + Send + Sync>),
}

impl Instructions {
    pub fn templated<F>(f: F) -> Self
    where
        F: Fn(&ContextVariables) -> String + Send + Sync + 'static,
    {
        Instructions::Templated(Arc::new(f))
    }

    /// Produce the system prompt for the current context
    pub fn resolve(&self, context: &ContextVariables) -> String {
        match self {
            Instructions::Fixed(text) => text.clone(),
            Instructions::Templated(f) => f(context),
        }
    }
}

impl Default for Instructions {
    fn default() -> Self {
        Instructions::Fixed(DEFAULT_INSTRUCTIONS.to_string())
    }
}

impl fmt::Debug for Instructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instructions::Fixed(text) => f.debug_tuple("Fixed").field(text).finish(),
            Instructions::Templated(_) => f.write_str("Templated(..)"),
        }
    }
}

impl From<&str> for Instructions {
    fn from(text: &str) -> Self {
        Instructions::Fixed(text.to_string())
    }
}

impl From<String> for Instructions {
    fn from(text: String) -> Self {
        Instructions::Fixed(text)
    }
}

/// Normalized outcome of one capability invocation
#[derive(Debug, Clone, Default)]
pub struct FunctionResult {
    /// Text shown to the model as the tool output
    pub value: String,
    /// Handoff target, if any
    pub agent: Option<Arc<AgentDefinition>>,
    /// Keys merged into the shared context, last write wins
    pub context_variables: ContextVariables,
}

impl FunctionResult {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn with_agent(mut self, agent: Arc<AgentDefinition>) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context_variables.insert(key.into(), value);
        self
    }

    pub fn is_handoff(&self) -> bool {
        self.agent.is_some()
    }
}

/// Anything a capability handler may return
#[derive(Debug, Clone)]
pub enum CapabilityOutput {
    Text(String),
    /// Shortcut for a bare handoff
    Handoff(Arc<AgentDefinition>),
    /// Already normalized; passed through unchanged
    Result(FunctionResult),
    Value(Value),
}

impl From<CapabilityOutput> for FunctionResult {
    fn from(output: CapabilityOutput) -> Self {
        match output {
            CapabilityOutput::Text(text) => FunctionResult::new(text),
            CapabilityOutput::Handoff(agent) => {
                FunctionResult::new(json!({ "handoff_to": agent.name }).to_string())
                    .with_agent(agent)
            }
            CapabilityOutput::Result(result) => result,
            CapabilityOutput::Value(Value::String(text)) => FunctionResult::new(text),
            CapabilityOutput::Value(other) => FunctionResult::new(other.to_string()),
        }
    }
}

impl From<String> for CapabilityOutput {
    fn from(text: String) -> Self {
        CapabilityOutput::Text(text)
    }
}

impl From<&str> for CapabilityOutput {
    fn from(text: &str) -> Self {
        CapabilityOutput::Text(text.to_string())
    }
}

impl From<FunctionResult> for CapabilityOutput {
    fn from(result: FunctionResult) -> Self {
        CapabilityOutput::Result(result)
    }
}

impl From<Arc<AgentDefinition>> for CapabilityOutput {
    fn from(agent: Arc<AgentDefinition>) -> Self {
        CapabilityOutput::Handoff(agent)
    }
}

impl From<Value> for CapabilityOutput {
    fn from(value: Value) -> Self {
        CapabilityOutput::Value(value)
    }
}

/// Executes a capability. Handlers that do not need the context ignore it.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn call(&self, args: Value, context: &ContextVariables)
        -> anyhow::Result<CapabilityOutput>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> CapabilityHandler for FnHandler<F>
where
    F: Fn(Value, ContextVariables) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<CapabilityOutput>> + Send,
{
    async fn call(
        &self,
        args: Value,
        context: &ContextVariables,
    ) -> anyhow::Result<CapabilityOutput> {
        (self.0)(args, context.clone()).await
    }
}

/// A named, schema-described operation an agent may invoke
#[derive(Clone)]
pub struct Capability {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
    handler: Arc<dyn CapabilityHandler>,
}

impl Capability {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: impl CapabilityHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(handler),
        }
    }

    /// Capability backed by an async closure over raw JSON arguments
    pub fn from_fn<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        f: F,
    ) -> Self
    where
        F: Fn(Value, ContextVariables) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<CapabilityOutput>> + Send + 'static,
    {
        Self::new(name, description, parameters, FnHandler(f))
    }

    /// Capability with a typed argument struct. The parameter schema is
    /// derived from `A` once, here.
    pub fn typed<A, F, Fut>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        A: JsonSchema + DeserializeOwned + Send + 'static,
        F: Fn(A, ContextVariables) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<CapabilityOutput>> + Send + 'static,
    {
        let name = name.into();
        let parameters = serde_json::to_value(schemars::schema_for!(A))
            .unwrap_or_else(|_| json!({ "type": "object" }));
        let label = name.clone();
        let f = Arc::new(f);
        Self::from_fn(name, description, parameters, move |args, ctx| {
            let f = Arc::clone(&f);
            let label = label.clone();
            async move {
                let args: A = serde_json::from_value(args)
                    .with_context(|| format!("invalid arguments for '{}'", label))?;
                f(args, ctx).await
            }
        })
    }

    pub async fn invoke(
        &self,
        args: Value,
        context: &ContextVariables,
    ) -> anyhow::Result<CapabilityOutput> {
        self.handler.call(args, context).await
    }

    /// Schema exposed to the model
    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: exposed_parameters(&self.parameters),
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Strip the context parameter and generator metadata from a schema
fn exposed_parameters(parameters: &Value) -> Value {
    let mut schema = match parameters {
        Value::Object(map) => map.clone(),
        _ => return json!({ "type": "object", "properties": {} }),
    };
    schema.remove("$schema");
    schema.remove("title");
    if let Some(Value::Object(props)) = schema.get_mut("properties") {
        props.remove(CONTEXT_PARAMETER);
    }
    if let Some(Value::Array(required)) = schema.get_mut("required") {
        required.retain(|r| r.as_str() != Some(CONTEXT_PARAMETER));
    }
    schema.entry("properties").or_insert_with(|| json!({}));
    Value::Object(schema)
}

/// A named agent: instructions, capabilities and an optional model override
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub name: String,
    pub instructions: Instructions,
    pub capabilities: Vec<Capability>,
    pub model: Option<String>,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: Instructions::default(),
            capabilities: Vec::new(),
            model: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<Instructions>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.extend(capabilities);
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn capability(&self, name: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.name == name)
    }

    pub fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.capabilities.iter().map(Capability::schema).collect()
    }

    pub fn into_shared(self) -> Arc<AgentDefinition> {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    struct EchoArgs {
        /// Text to echo back
        text: String,
    }

    fn echo() -> Capability {
        Capability::typed("echo", "Echo text", |args: EchoArgs, _ctx| async move {
            Ok(CapabilityOutput::Text(args.text))
        })
    }

    #[test]
    fn test_instructions_resolve() {
        let fixed = Instructions::from("be brief");
        let templated = Instructions::templated(|ctx| {
            format!("user is {}", ctx.get("user").and_then(Value::as_str).unwrap_or("?"))
        });
        let mut ctx = ContextVariables::new();
        ctx.insert("user".into(), json!("ada"));

        assert_eq!(fixed.resolve(&ctx), "be brief");
        assert_eq!(templated.resolve(&ctx), "user is ada");
        assert_eq!(Instructions::default().resolve(&ctx), DEFAULT_INSTRUCTIONS);
    }

    #[test]
    fn test_typed_schema_has_properties() {
        let schema = echo().schema();
        assert_eq!(schema.name, "echo");
        assert!(schema.parameters["properties"]["text"].is_object());
        assert!(schema.parameters.get("$schema").is_none());
        assert!(schema.parameters.get("title").is_none());
    }

    #[test]
    fn test_context_parameter_hidden() {
        let capability = Capability::from_fn(
            "greet",
            "Greet",
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "context_variables": {"type": "object"}
                },
                "required": ["name", "context_variables"]
            }),
            |_args, _ctx| async { Ok(CapabilityOutput::from("hi")) },
        );
        let params = capability.schema().parameters;

        assert!(params["properties"].get(CONTEXT_PARAMETER).is_none());
        assert_eq!(params["required"], json!(["name"]));
    }

    #[tokio::test]
    async fn test_typed_rejects_bad_arguments() {
        let ctx = ContextVariables::new();
        let ok = echo().invoke(json!({"text": "hey"}), &ctx).await.unwrap();
        assert!(matches!(ok, CapabilityOutput::Text(ref t) if t == "hey"));

        let err = echo().invoke(json!({"wrong": 1}), &ctx).await.unwrap_err();
        assert!(err.to_string().contains("echo"));
    }

    #[test]
    fn test_normalization() {
        let target = AgentDefinition::new("coder").into_shared();

        let handoff: FunctionResult = CapabilityOutput::Handoff(target).into();
        assert_eq!(handoff.value, r#"{"handoff_to":"coder"}"#);
        assert!(handoff.is_handoff());

        let value: FunctionResult = CapabilityOutput::Value(json!({"n": 2})).into();
        assert_eq!(value.value, r#"{"n":2}"#);
        assert!(!value.is_handoff());

        let passthrough: FunctionResult =
            CapabilityOutput::Result(FunctionResult::new("x").with_context("k", json!(1))).into();
        assert_eq!(passthrough.value, "x");
        assert_eq!(passthrough.context_variables["k"], json!(1));
    }
}
