use serde::Deserialize;

/// A module of the host application, as recorded at generation time.
#[derive(Debug, Eq, PartialEq, Clone, Hash)]
pub struct Module {
    pub name: String,
    /// Foreign modules referenced by base classes or attribute types,
    /// deduplicated and sorted.
    pub imports: Vec<String>,
    pub modules: Vec<Module>,
    pub classes: Vec<Class>,
    pub functions: Vec<Function>,
    /// Module-level variables, rendered after classes and functions.
    pub attributes: Vec<Attribute>,
    pub docstring: Option<String>,
}

#[derive(Debug, Eq, PartialEq, Clone, Hash)]
pub struct Class {
    /// Name the module binds the class to.
    pub name: String,
    /// Fully qualified name of the class when it differs from the binding
    /// name. Rendered as a `__name__` override in the stub.
    pub canonical_name: Option<String>,
    /// Base classes in declaration order, fully qualified for foreign types.
    pub bases: Vec<String>,
    pub attributes: Vec<Attribute>,
    pub methods: Vec<Function>,
    pub docstring: Option<String>,
}

#[derive(Debug, Eq, PartialEq, Clone, Hash)]
pub struct Function {
    pub name: String,
    pub arguments: Arguments,
    pub docstring: Option<String>,
    /// Rendered return expression, used by procedure stubs to name the
    /// return value types. `None` renders a plain `pass` body.
    pub returns: Option<String>,
}

#[derive(Debug, Eq, PartialEq, Clone, Hash, Default)]
pub struct Arguments {
    pub args: Vec<Argument>,
    /// *args
    pub vararg: Option<String>,
    /// **kwargs
    pub kwarg: Option<String>,
}

#[derive(Debug, Eq, PartialEq, Clone, Hash)]
pub struct Argument {
    pub name: String,
    /// Default value as a Python expression
    pub default_value: Option<String>,
}

/// A module-level or class-level variable. Stubs only record the type of the
/// value, not the value itself.
#[derive(Debug, Eq, PartialEq, Clone, Hash)]
pub struct Attribute {
    pub name: String,
    pub type_name: String,
}

/// Snapshot of the host's procedure registry.
#[derive(Debug, Eq, PartialEq, Clone, Deserialize)]
pub struct RegistryDump {
    /// Dotted name of the module the registry is exposed under, e.g. `app.pdb`.
    pub name: String,
    #[serde(default)]
    pub docstring: Option<String>,
    pub procedures: Vec<Procedure>,
}

#[derive(Debug, Eq, PartialEq, Clone, Deserialize)]
pub struct Procedure {
    /// Raw registry name, dash-separated.
    pub name: String,
    #[serde(default)]
    pub blurb: String,
    #[serde(default)]
    pub help: String,
    #[serde(default)]
    pub params: Vec<ProcParam>,
    #[serde(default)]
    pub return_values: Vec<ProcParam>,
}

#[derive(Debug, Eq, PartialEq, Clone, Deserialize)]
pub struct ProcParam {
    pub type_id: u32,
    /// Raw parameter name, dash-separated.
    pub name: String,
    #[serde(default)]
    pub description: String,
}
