//! Canonical message type naming.
//!
//! Every message carries one or more URN-style type names in its envelope
//! (`messageType`). Subscribers dispatch on these names, so they must be
//! stable across processes and languages:
//!
//! - plain type: `urn:message:<namespace>:<name>`
//! - fault wrapper: `urn:message:MassTransit:Fault[[<namespace>:<name>]]`
//!
//! # Namespaces
//!
//! A [`MessageType`] captures its namespace by value when it is constructed.
//! The preferred way to supply the namespace is explicitly, through
//! [`MessageType::with_namespace`] or a [`MessageTypeFactory`].
//!
//! [`MessageType::new`] falls back to the process-wide default namespace
//! (initially [`DEFAULT_NAMESPACE`]). That default is explicit global
//! configuration: [`set_default_namespace`] changes it for values constructed
//! afterwards only. Values that already exist keep the namespace they
//! captured.

use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

/// Namespace used when none was configured.
pub const DEFAULT_NAMESPACE: &str = "Messages";

const URN_PREFIX: &str = "urn:message:";
const FAULT_NAMESPACE: &str = "MassTransit";

static DEFAULT_NS: OnceLock<RwLock<Arc<str>>> = OnceLock::new();

fn default_ns_cell() -> &'static RwLock<Arc<str>> {
    DEFAULT_NS.get_or_init(|| RwLock::new(Arc::from(DEFAULT_NAMESPACE)))
}

/// The current process-wide default namespace.
pub fn default_namespace() -> Arc<str> {
    // ---
    match default_ns_cell().read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Replace the process-wide default namespace.
///
/// Only [`MessageType`] values and [`MessageTypeFactory`] instances created
/// after this call observe the new namespace.
pub fn set_default_namespace(namespace: impl Into<Arc<str>>) {
    // ---
    let namespace = namespace.into();
    let mut guard = match default_ns_cell().write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = namespace;
}

/// Behavior shared by plain and fault type values.
pub trait MessageTypeName {
    /// Canonical URN string.
    fn urn(&self) -> String;

    /// Ordered list of type names placed in an envelope's `messageType`.
    ///
    /// Currently always a single element.
    fn to_message_type(&self) -> Vec<String> {
        vec![self.urn()]
    }
}

/// Canonical type of a message shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageType {
    name: Arc<str>,
    namespace: Arc<str>,
}

impl MessageType {
    // ---

    /// Type in the process-wide default namespace, captured now.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self::with_namespace(name, default_namespace())
    }

    /// Type in an explicit namespace.
    pub fn with_namespace(name: impl Into<Arc<str>>, namespace: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The fault wrapper of this type.
    pub fn fault(&self) -> FaultMessageType {
        FaultMessageType::new(self.clone())
    }

    /// Parse a plain `urn:message:<namespace>:<name>` string.
    ///
    /// The namespace ends at the first `:` after the prefix; the remainder is
    /// the name. Fault wrappers (`...:Fault[[ns:name]]`) are not plain types
    /// and yield `None`.
    pub fn parse_urn(urn: &str) -> Option<Self> {
        // ---
        let rest = urn.strip_prefix(URN_PREFIX)?;
        let (namespace, name) = rest.split_once(':')?;
        if namespace.is_empty() || name.is_empty() || name.contains("[[") {
            return None;
        }
        Some(Self::with_namespace(name, namespace))
    }
}

impl MessageTypeName for MessageType {
    fn urn(&self) -> String {
        format!("{URN_PREFIX}{}:{}", self.namespace, self.name)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.urn())
    }
}

/// Fault wrapper around a plain [`MessageType`].
///
/// Built only from a plain type, so fault-of-fault cannot be expressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FaultMessageType {
    message_type: MessageType,
}

impl FaultMessageType {
    pub fn new(message_type: MessageType) -> Self {
        Self { message_type }
    }

    /// The wrapped plain type.
    pub fn message_type(&self) -> &MessageType {
        &self.message_type
    }
}

impl MessageTypeName for FaultMessageType {
    fn urn(&self) -> String {
        format!(
            "{URN_PREFIX}{FAULT_NAMESPACE}:Fault[[{}:{}]]",
            self.message_type.namespace, self.message_type.name
        )
    }
}

impl fmt::Display for FaultMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.urn())
    }
}

impl From<MessageType> for FaultMessageType {
    fn from(message_type: MessageType) -> Self {
        Self::new(message_type)
    }
}

/// Builds type values in a fixed namespace.
///
/// The namespace is supplied at construction, so no global state is read
/// when types are created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTypeFactory {
    namespace: Arc<str>,
}

impl MessageTypeFactory {
    pub fn new(namespace: impl Into<Arc<str>>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Factory bound to the process-wide default namespace as it is now.
    pub fn from_default() -> Self {
        Self {
            namespace: default_namespace(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn message_type(&self, name: impl Into<Arc<str>>) -> MessageType {
        MessageType::with_namespace(name, self.namespace.clone())
    }

    pub fn fault(&self, name: impl Into<Arc<str>>) -> FaultMessageType {
        self.message_type(name).fault()
    }
}

impl Default for MessageTypeFactory {
    fn default() -> Self {
        Self::from_default()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_plain_urn() {
        // ---
        let mt = MessageType::with_namespace("OrderSubmitted", "Messages");
        assert_eq!(mt.urn(), "urn:message:Messages:OrderSubmitted");
        assert_eq!(mt.to_string(), mt.urn());
    }

    #[test]
    fn test_fault_urn() {
        // ---
        let fault = MessageType::with_namespace("Order", "Sales").fault();
        assert_eq!(fault.urn(), "urn:message:MassTransit:Fault[[Sales:Order]]");
        assert_eq!(fault.message_type().name(), "Order");
    }

    #[test]
    fn test_type_list_is_single_element() {
        // ---
        let mt = MessageType::with_namespace("X", "Y");
        assert_eq!(mt.to_message_type(), vec!["urn:message:Y:X".to_string()]);
        assert_eq!(
            mt.fault().to_message_type(),
            vec!["urn:message:MassTransit:Fault[[Y:X]]".to_string()]
        );
    }

    #[test]
    fn test_factory_uses_its_namespace() {
        // ---
        let factory = MessageTypeFactory::new("Billing");
        assert_eq!(factory.message_type("Invoice").urn(), "urn:message:Billing:Invoice");
        assert_eq!(
            factory.fault("Invoice").urn(),
            "urn:message:MassTransit:Fault[[Billing:Invoice]]"
        );
    }

    #[test]
    fn test_parse_urn() {
        // ---
        let mt = MessageType::parse_urn("urn:message:Sales.Contracts:Order").unwrap();
        assert_eq!(mt.namespace(), "Sales.Contracts");
        assert_eq!(mt.name(), "Order");

        assert!(MessageType::parse_urn("urn:message:NoName").is_none());
        assert!(MessageType::parse_urn("urn:message::X").is_none());
        assert!(MessageType::parse_urn("message:Sales:Order").is_none());
    }

    #[test]
    fn test_parse_urn_rejects_fault_wrapper() {
        // ---
        let fault = MessageType::with_namespace("Order", "Sales").fault();
        assert!(MessageType::parse_urn(&fault.urn()).is_none());
    }

    #[test]
    fn test_usable_through_trait_object() {
        // ---
        let types: Vec<Box<dyn MessageTypeName>> = vec![
            Box::new(MessageType::with_namespace("A", "N")),
            Box::new(MessageType::with_namespace("A", "N").fault()),
        ];
        let urns: Vec<String> = types.iter().map(|t| t.urn()).collect();
        assert_eq!(
            urns,
            vec!["urn:message:N:A", "urn:message:MassTransit:Fault[[N:A]]"]
        );
    }
}
