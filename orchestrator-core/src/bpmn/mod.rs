//! BPMN 2.0 XML parsing and validation against the supported element
//! subset. Mirrors the namespace-aware, path-addressed error reporting
//! of the original validator this crate replaces: every rejected
//! element or attribute is reported with a dotted, index-suffixed path
//! (`process.serviceTask[1].extensionElements[0]`) so a caller can
//! point a user at the exact offending node.

pub(crate) mod tree;
mod validator;

pub use validator::{
    validate_bpmn_xml, BpmnDefinitionSnapshot, CatalogBindingPlaceholder, FormSchemaRef,
    ValidationError,
};
