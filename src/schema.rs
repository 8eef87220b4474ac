//! Attribute schemas for the provider block, resources and data sources.
//!
//! A schema tells the host which attributes exist, which are user-settable,
//! which the provider computes, and which changes force a replacement. The
//! planner and validator in this crate read the same definitions.

use std::collections::HashMap;

use serde::Serialize;

/// Value type of an attribute. Sent to the host JSON-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    String,
    Int64,
    Float64,
    Bool,
    List(Box<AttributeType>),
    /// Unordered; two sets are equal regardless of element order.
    Set(Box<AttributeType>),
    /// String keys to values of one type.
    Map(Box<AttributeType>),
    /// Fixed members, e.g. the `version` object of cluster info.
    Object(HashMap<String, AttributeType>),
    /// Anything; not type checked.
    Dynamic,
}

impl AttributeType {
    pub fn list(element: AttributeType) -> Self {
        Self::List(Box::new(element))
    }

    pub fn set(element: AttributeType) -> Self {
        Self::Set(Box::new(element))
    }

    pub fn map(element: AttributeType) -> Self {
        Self::Map(Box::new(element))
    }

    pub fn object(members: HashMap<String, AttributeType>) -> Self {
        Self::Object(members)
    }
}

/// Who sets an attribute, and whether its value must be hidden.
///
/// `optional` + `computed` means the user may set it and the API fills it
/// in otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttributeFlags {
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    pub sensitive: bool,
}

impl AttributeFlags {
    pub fn required() -> Self {
        Self {
            required: true,
            ..Self::default()
        }
    }

    pub fn optional() -> Self {
        Self {
            optional: true,
            ..Self::default()
        }
    }

    pub fn computed() -> Self {
        Self {
            computed: true,
            ..Self::default()
        }
    }

    pub fn optional_computed() -> Self {
        Self {
            optional: true,
            computed: true,
            ..Self::default()
        }
    }

    pub fn sensitive(self) -> Self {
        Self {
            sensitive: true,
            ..self
        }
    }
}

/// One attribute of a block.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub attr_type: AttributeType,
    pub flags: AttributeFlags,
    pub description: Option<String>,
    /// A change to this attribute replaces the object.
    pub force_new: bool,
    /// Planned when the configuration leaves the attribute null.
    pub default: Option<serde_json::Value>,
}

impl Attribute {
    pub fn new(attr_type: AttributeType, flags: AttributeFlags) -> Self {
        Self {
            attr_type,
            flags,
            description: None,
            force_new: false,
            default: None,
        }
    }

    pub fn required_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::required())
    }

    pub fn optional_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::optional())
    }

    pub fn computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::computed())
    }

    pub fn optional_computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::optional_computed())
    }

    pub fn optional_string_list() -> Self {
        Self::new(AttributeType::list(AttributeType::String), AttributeFlags::optional())
    }

    pub fn optional_string_set() -> Self {
        Self::new(AttributeType::set(AttributeType::String), AttributeFlags::optional())
    }

    pub fn optional_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::optional())
    }

    pub fn optional_computed_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::optional_computed())
    }

    pub fn computed_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::computed())
    }

    pub fn optional_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::optional())
    }

    pub fn optional_computed_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::optional_computed())
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.flags.sensitive = true;
        self
    }
}

/// How a nested block appears in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BlockNestingMode {
    /// One object, or null.
    #[default]
    Single,
    /// An ordered array of objects.
    List,
    /// An unordered array of objects.
    Set,
    /// An object whose values are blocks, e.g. a data view's `field_formats`.
    Map,
}

/// A group of attributes and nested blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub attributes: HashMap<String, Attribute>,
    pub blocks: HashMap<String, NestedBlock>,
    pub description: Option<String>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    pub fn with_block(mut self, name: impl Into<String>, block: NestedBlock) -> Self {
        self.blocks.insert(name.into(), block);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Whether a change anywhere below this block can force a replacement.
    pub fn has_force_new(&self) -> bool {
        self.attributes.values().any(|a| a.force_new)
            || self
                .blocks
                .values()
                .any(|b| b.force_new || b.block.has_force_new())
    }
}

/// A block nested under a name, with item-count limits.
///
/// `max_items` of 0 means unbounded.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedBlock {
    pub block: Block,
    pub nesting_mode: BlockNestingMode,
    pub min_items: u32,
    pub max_items: u32,
    /// A change anywhere in the block replaces the object.
    pub force_new: bool,
}

impl NestedBlock {
    fn with_mode(block: Block, nesting_mode: BlockNestingMode, max_items: u32) -> Self {
        Self {
            block,
            nesting_mode,
            min_items: 0,
            max_items,
            force_new: false,
        }
    }

    pub fn single(block: Block) -> Self {
        Self::with_mode(block, BlockNestingMode::Single, 1)
    }

    pub fn list(block: Block) -> Self {
        Self::with_mode(block, BlockNestingMode::List, 0)
    }

    pub fn set(block: Block) -> Self {
        Self::with_mode(block, BlockNestingMode::Set, 0)
    }

    pub fn map(block: Block) -> Self {
        Self::with_mode(block, BlockNestingMode::Map, 0)
    }

    pub fn with_min_items(mut self, min: u32) -> Self {
        self.min_items = min;
        self
    }

    pub fn with_max_items(mut self, max: u32) -> Self {
        self.max_items = max;
        self
    }

    pub fn with_force_new(mut self) -> Self {
        self.force_new = true;
        self
    }
}

/// Versioned root block of a resource, data source or the provider block.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    /// Bumped when stored state needs an upgrade.
    pub version: u64,
    pub block: Block,
}

impl Default for Schema {
    fn default() -> Self {
        Self::v0()
    }
}

impl Schema {
    pub fn new(version: u64) -> Self {
        Self {
            version,
            block: Block::new(),
        }
    }

    pub fn v0() -> Self {
        Self::new(0)
    }

    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.block.attributes.insert(name.into(), attr);
        self
    }

    pub fn with_block(mut self, name: impl Into<String>, block: NestedBlock) -> Self {
        self.block.blocks.insert(name.into(), block);
        self
    }
}

/// Everything `GetSchema` returns, keyed by type name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderSchema {
    pub provider: Schema,
    pub resources: HashMap<String, Schema>,
    pub data_sources: HashMap<String, Schema>,
}

impl ProviderSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider_config(mut self, schema: Schema) -> Self {
        self.provider = schema;
        self
    }

    pub fn with_resource(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.resources.insert(name.into(), schema);
        self
    }

    pub fn with_data_source(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.data_sources.insert(name.into(), schema);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSeverity {
    /// The operation failed.
    Error,
    Warning,
}

/// A message for the user, attached to any response.
///
/// `attribute` is a dotted path such as `kibana.endpoints` or
/// `data_view.source_filters.1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub summary: String,
    pub detail: Option<String>,
    pub attribute: Option<String>,
}

impl Diagnostic {
    fn new(severity: DiagnosticSeverity, summary: impl Into<String>) -> Self {
        Self {
            severity,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    pub fn error(summary: impl Into<String>) -> Self {
        Self::new(DiagnosticSeverity::Error, summary)
    }

    pub fn warning(summary: impl Into<String>) -> Self {
        Self::new(DiagnosticSeverity::Warning, summary)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }
}
