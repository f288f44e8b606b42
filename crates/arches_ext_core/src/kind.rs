//! Extension kinds and the static capability record each one carries.
//!
//! Every per-type special case of the registry (key field, key strategy,
//! display-name field, activation shape, derived fields) lives in one
//! [`KindSchema`] per [`ExtensionKind`]. The column list here must match the
//! tables created by `migrations/v001_extensions.sql`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExtensionKind {
    CardComponent,
    Datatype,
    EtlModule,
    Function,
    Plugin,
    Report,
    SearchFilter,
    Widget,
}

pub const ALL_KINDS: [ExtensionKind; 8] = [
    ExtensionKind::CardComponent,
    ExtensionKind::Datatype,
    ExtensionKind::EtlModule,
    ExtensionKind::Function,
    ExtensionKind::Plugin,
    ExtensionKind::Report,
    ExtensionKind::SearchFilter,
    ExtensionKind::Widget,
];

impl ExtensionKind {
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        ALL_KINDS
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CardComponent => "card-component",
            Self::Datatype => "datatype",
            Self::EtlModule => "etl-module",
            Self::Function => "function",
            Self::Plugin => "plugin",
            Self::Report => "report",
            Self::SearchFilter => "search-filter",
            Self::Widget => "widget",
        }
    }

    pub fn names() -> Vec<&'static str> {
        ALL_KINDS.iter().map(|kind| kind.as_str()).collect()
    }

    pub fn schema(self) -> &'static KindSchema {
        match self {
            Self::CardComponent => &CARD_COMPONENT,
            Self::Datatype => &DATATYPE,
            Self::EtlModule => &ETL_MODULE,
            Self::Function => &FUNCTION,
            Self::Plugin => &PLUGIN,
            Self::Report => &REPORT,
            Self::SearchFilter => &SEARCH_FILTER,
            Self::Widget => &WIDGET,
        }
    }

    pub fn supports_activation(self) -> bool {
        self.schema().activation.is_some()
    }
}

impl fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage shape of a single non-key field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    Text,
    Uuid,
    Json,
    Bool,
    Integer,
}

impl FieldShape {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Uuid => "uuid",
            Self::Json => "json",
            Self::Bool => "bool",
            Self::Integer => "integer",
        }
    }
}

/// Value a freshly constructed record starts with before the definition is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnDefault {
    Bool(bool),
    Integer(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub shape: FieldShape,
    pub required: bool,
    pub default: Option<ColumnDefault>,
}

const fn required(name: &'static str, shape: FieldShape) -> FieldSpec {
    FieldSpec {
        name,
        shape,
        required: true,
        default: None,
    }
}

const fn optional(name: &'static str, shape: FieldShape) -> FieldSpec {
    FieldSpec {
        name,
        shape,
        required: false,
        default: None,
    }
}

const fn defaulted(name: &'static str, shape: FieldShape, default: ColumnDefault) -> FieldSpec {
    FieldSpec {
        name,
        shape,
        required: true,
        default: Some(default),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    /// A missing or malformed key is replaced with a fresh UUID v4.
    GeneratedUuid,
    /// The key is a natural value that the definition must supply.
    Natural,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Boolean `flag` nested inside the JSON mapping stored in `field`.
    ConfigFlag {
        field: &'static str,
        flag: &'static str,
    },
    /// Top-level boolean column.
    Column { field: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derivation {
    /// `field` is always set to the base name of the source file.
    ModuleNameFromSource { field: &'static str },
    /// `field` takes `value` when the definition does not mention it.
    DefaultBool { field: &'static str, value: bool },
}

#[derive(Debug)]
pub struct KindSchema {
    pub table: &'static str,
    pub key_field: &'static str,
    pub key_strategy: KeyStrategy,
    pub name_field: &'static str,
    pub fields: &'static [FieldSpec],
    pub activation: Option<Activation>,
    pub derivations: &'static [Derivation],
}

impl KindSchema {
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Display name lives in the key column for natural-key kinds.
    pub fn name_is_key(&self) -> bool {
        self.name_field == self.key_field
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        let mut columns = Vec::with_capacity(self.fields.len() + 1);
        columns.push(self.key_field);
        columns.extend(self.fields.iter().map(|field| field.name));
        columns
    }
}

use FieldShape::{Bool, Integer, Json, Text, Uuid};

static CARD_COMPONENT: KindSchema = KindSchema {
    table: "card_components",
    key_field: "componentid",
    key_strategy: KeyStrategy::GeneratedUuid,
    name_field: "name",
    fields: &[
        required("name", Text),
        optional("description", Text),
        required("component", Text),
        required("componentname", Text),
        optional("defaultconfig", Json),
    ],
    activation: None,
    derivations: &[],
};

static DATATYPE: KindSchema = KindSchema {
    table: "d_data_types",
    key_field: "datatype",
    key_strategy: KeyStrategy::Natural,
    name_field: "datatype",
    fields: &[
        required("iconclass", Text),
        optional("modulename", Text),
        optional("classname", Text),
        optional("defaultwidget", Uuid),
        optional("defaultconfig", Json),
        optional("configcomponent", Text),
        optional("configname", Text),
        required("isgeometric", Bool),
        required("issearchable", Bool),
    ],
    activation: None,
    derivations: &[
        Derivation::ModuleNameFromSource {
            field: "modulename",
        },
        Derivation::DefaultBool {
            field: "issearchable",
            value: false,
        },
    ],
};

static ETL_MODULE: KindSchema = KindSchema {
    table: "etl_modules",
    key_field: "etlmoduleid",
    key_strategy: KeyStrategy::GeneratedUuid,
    name_field: "name",
    fields: &[
        required("name", Text),
        required("icon", Text),
        required("etl_type", Text),
        required("component", Text),
        required("componentname", Text),
        optional("modulename", Text),
        optional("classname", Text),
        optional("config", Json),
        optional("slug", Text),
        optional("description", Text),
        optional("helpsortorder", Integer),
        optional("helptemplate", Text),
    ],
    activation: Some(Activation::ConfigFlag {
        field: "config",
        flag: "show",
    }),
    derivations: &[],
};

static FUNCTION: KindSchema = KindSchema {
    table: "functions",
    key_field: "functionid",
    key_strategy: KeyStrategy::GeneratedUuid,
    name_field: "name",
    fields: &[
        required("name", Text),
        optional("functiontype", Text),
        optional("description", Text),
        optional("defaultconfig", Json),
        optional("modulename", Text),
        optional("classname", Text),
        optional("component", Text),
    ],
    activation: None,
    derivations: &[Derivation::ModuleNameFromSource {
        field: "modulename",
    }],
};

static PLUGIN: KindSchema = KindSchema {
    table: "plugins",
    key_field: "pluginid",
    key_strategy: KeyStrategy::GeneratedUuid,
    name_field: "name",
    fields: &[
        required("name", Text),
        required("icon", Text),
        required("component", Text),
        required("componentname", Text),
        optional("config", Json),
        optional("slug", Text),
        optional("sortorder", Integer),
        optional("helptemplate", Text),
    ],
    activation: Some(Activation::ConfigFlag {
        field: "config",
        flag: "show",
    }),
    derivations: &[],
};

static REPORT: KindSchema = KindSchema {
    table: "report_templates",
    key_field: "templateid",
    key_strategy: KeyStrategy::GeneratedUuid,
    name_field: "name",
    fields: &[
        required("preload_resource_data", Bool),
        required("name", Text),
        optional("description", Text),
        required("component", Text),
        required("componentname", Text),
        optional("defaultconfig", Json),
    ],
    activation: None,
    derivations: &[Derivation::DefaultBool {
        field: "preload_resource_data",
        value: true,
    }],
};

static SEARCH_FILTER: KindSchema = KindSchema {
    table: "search_component",
    key_field: "searchcomponentid",
    key_strategy: KeyStrategy::GeneratedUuid,
    name_field: "name",
    fields: &[
        required("name", Text),
        required("icon", Text),
        optional("modulename", Text),
        optional("classname", Text),
        required("type", Text),
        optional("componentpath", Text),
        required("componentname", Text),
        optional("sortorder", Integer),
        defaulted("enabled", Bool, ColumnDefault::Bool(false)),
    ],
    activation: Some(Activation::Column { field: "enabled" }),
    derivations: &[],
};

static WIDGET: KindSchema = KindSchema {
    table: "widgets",
    key_field: "widgetid",
    key_strategy: KeyStrategy::GeneratedUuid,
    name_field: "name",
    fields: &[
        required("name", Text),
        required("component", Text),
        optional("defaultconfig", Json),
        optional("helptext", Text),
        required("datatype", Text),
    ],
    activation: None,
    derivations: &[],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_every_kind_name() {
        for kind in ALL_KINDS {
            assert_eq!(ExtensionKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(
            ExtensionKind::parse(" Search-Filter "),
            Some(ExtensionKind::SearchFilter)
        );
        assert_eq!(ExtensionKind::parse("map-layer"), None);
    }

    #[test]
    fn only_three_kinds_support_activation() {
        let supported: Vec<_> = ALL_KINDS
            .into_iter()
            .filter(|kind| kind.supports_activation())
            .collect();
        assert_eq!(
            supported,
            vec![
                ExtensionKind::EtlModule,
                ExtensionKind::Plugin,
                ExtensionKind::SearchFilter
            ]
        );
    }

    #[test]
    fn datatype_uses_its_natural_key_as_display_name() {
        let schema = ExtensionKind::Datatype.schema();
        assert!(schema.name_is_key());
        assert_eq!(schema.key_strategy, KeyStrategy::Natural);
        assert!(schema.field("datatype").is_none());
    }

    #[test]
    fn derived_fields_exist_in_field_list() {
        for kind in ALL_KINDS {
            let schema = kind.schema();
            for derivation in schema.derivations {
                let field = match derivation {
                    Derivation::ModuleNameFromSource { field } => field,
                    Derivation::DefaultBool { field, .. } => field,
                };
                assert!(schema.field(field).is_some(), "{kind}: {field}");
            }
            if !schema.name_is_key() {
                assert!(schema.field(schema.name_field).is_some(), "{kind}");
            }
        }
    }
}
