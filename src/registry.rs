use crate::model::{Argument, Arguments, Function, Module, ProcParam, Procedure, RegistryDump};
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

/// Humanization lookup for registry values.
///
/// The mapping from registry type ids to rendered Python types, the known
/// enumeration identifiers and the run-mode handling are conventions of the
/// host application, so they are data, not code. The built-in default covers
/// the scalar and array ids; hosts override it with a JSON table.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct TypeTable {
    /// Registry type id to rendered type.
    pub types: BTreeMap<u32, RegistryType>,
    /// Raw (dash-separated) ALL-CAPS identifiers of enumerated values.
    pub enums: Vec<String>,
    /// Module the enumerated values are exposed under, e.g. `appenums`.
    pub enums_namespace: String,
    /// Words standing for the boolean literals in registry prose, truthy
    /// word first.
    pub bool_sentinels: [String; 2],
    /// Default value expression for a relocated `run_mode` parameter.
    pub run_mode_default: String,
    /// Procedures with this name prefix are generated temporaries and are
    /// excluded from the stubs.
    pub temporary_procedure_prefix: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RegistryType {
    pub name: String,
    /// Element type for array-like containers, rendered as `tuple(element)`
    /// in parameter descriptions.
    #[serde(default)]
    pub element: Option<String>,
}

impl RegistryType {
    fn new(name: &str, element: Option<&str>) -> Self {
        Self {
            name: name.into(),
            element: element.map(Into::into),
        }
    }

    /// Type name as shown in `Parameters:`/`Returns:` docstring sections
    fn display_name(&self) -> String {
        match &self.element {
            Some(element) => format!("{}({})", self.name, element),
            None => self.name.clone(),
        }
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        Self {
            types: BTreeMap::from([
                (0, RegistryType::new("int", None)),
                (1, RegistryType::new("int", None)),
                (2, RegistryType::new("int", None)),
                (3, RegistryType::new("float", None)),
                (4, RegistryType::new("str", None)),
                (5, RegistryType::new("tuple", Some("int"))),
                (6, RegistryType::new("tuple", Some("int"))),
                (7, RegistryType::new("tuple", Some("int"))),
                (8, RegistryType::new("tuple", Some("float"))),
                (9, RegistryType::new("tuple", Some("str"))),
            ]),
            enums: Vec::new(),
            enums_namespace: "enums".into(),
            bool_sentinels: ["TRUE".into(), "FALSE".into()],
            run_mode_default: "enums.RUN_NONINTERACTIVE".into(),
            temporary_procedure_prefix: "temp-procedure-".into(),
        }
    }
}

impl TypeTable {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse the type table {}", path.display()))
    }
}

/// Rendered type used when the table does not know a type id
const PLACEHOLDER_TYPE: &str = "object";

pub fn read_registry_dump(path: impl AsRef<Path>) -> Result<RegistryDump> {
    let path = path.as_ref();
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse the registry dump {}", path.display()))
}

/// Converts a registry snapshot into a module of procedure stubs.
pub fn introspect_registry(dump: &RegistryDump, table: &TypeTable) -> Module {
    // Prose quotes procedures by their raw registry name, stubs expose them
    // as `<registry module>.<snake_name>`
    let registry_alias = dump.name.rsplit('.').next().unwrap_or(&dump.name);
    let procedure_names = dump
        .procedures
        .iter()
        .filter(|procedure| !is_temporary(procedure, table))
        .map(|procedure| {
            (
                procedure.name.clone(),
                format!("{}.{}", registry_alias, pythonize(&procedure.name)),
            )
        })
        .collect::<HashMap<_, _>>();

    let mut functions = dump
        .procedures
        .iter()
        .filter(|procedure| !is_temporary(procedure, table))
        .map(|procedure| procedure_stub(procedure, table, &procedure_names))
        .collect::<Vec<_>>();
    functions.sort_by(|l, r| l.name.cmp(&r.name));

    Module {
        name: dump.name.clone(),
        imports: Vec::new(),
        modules: Vec::new(),
        classes: Vec::new(),
        functions,
        attributes: Vec::new(),
        docstring: dump.docstring.clone(),
    }
}

fn is_temporary(procedure: &Procedure, table: &TypeTable) -> bool {
    !table.temporary_procedure_prefix.is_empty()
        && procedure.name.starts_with(&table.temporary_procedure_prefix)
}

struct HumanizedParam {
    name: String,
    type_name: String,
    element: Option<String>,
    description: String,
}

fn procedure_stub(
    procedure: &Procedure,
    table: &TypeTable,
    procedure_names: &HashMap<String, String>,
) -> Function {
    let param_names = procedure
        .params
        .iter()
        .chain(&procedure.return_values)
        .map(|param| (param.name.clone(), pythonize(&param.name)))
        .collect::<HashMap<_, _>>();

    let mut params = procedure
        .params
        .iter()
        .map(|param| humanize_param(param, table, &param_names))
        .collect::<Vec<_>>();
    let has_run_mode = move_run_mode_param_to_end(&mut params);

    let returns = procedure
        .return_values
        .iter()
        .map(|value| {
            let mut humanized = resolve_param(value, table);
            humanized.description = pythonize_enum_names(&humanized.description, table);
            humanized
        })
        .collect::<Vec<_>>();

    let docstring = procedure_docstring(
        procedure,
        &params,
        &returns,
        table,
        procedure_names,
        &param_names,
    );
    let docstring = (!docstring.is_empty()).then_some(docstring);

    let args = params
        .iter()
        .map(|param| Argument {
            name: param.name.clone(),
            default_value: (has_run_mode && param.name == "run_mode")
                .then(|| table.run_mode_default.clone()),
        })
        .collect();

    Function {
        name: pythonize(&procedure.name),
        arguments: Arguments {
            args,
            vararg: None,
            kwarg: None,
        },
        docstring,
        returns: Some(return_expression(&procedure.return_values, table)),
    }
}

fn resolve_param(param: &ProcParam, table: &TypeTable) -> HumanizedParam {
    let (type_name, element) = match table.types.get(&param.type_id) {
        Some(registry_type) => (registry_type.name.clone(), registry_type.element.clone()),
        // Unknown value shape, fall back to the generic placeholder
        None => (PLACEHOLDER_TYPE.into(), None),
    };
    HumanizedParam {
        name: pythonize(&param.name),
        type_name,
        element,
        description: param.description.clone(),
    }
}

fn humanize_param(
    param: &ProcParam,
    table: &TypeTable,
    param_names: &HashMap<String, String>,
) -> HumanizedParam {
    let mut humanized = resolve_param(param, table);
    convert_int_param_to_bool(&mut humanized);
    humanized.description = pythonize_enum_names(&humanized.description, table);
    humanized.description = pythonize_constraint_suffix(&humanized.description, param_names);
    humanized
}

fn move_run_mode_param_to_end(params: &mut Vec<HumanizedParam>) -> bool {
    let Some(index) = params.iter().position(|param| param.name == "run_mode") else {
        return false;
    };
    let run_mode = params.remove(index);
    params.push(run_mode);
    true
}

fn return_expression(return_values: &[ProcParam], table: &TypeTable) -> String {
    let type_name = |value: &ProcParam| {
        table
            .types
            .get(&value.type_id)
            .map_or(PLACEHOLDER_TYPE.into(), |registry_type| {
                registry_type.name.clone()
            })
    };
    match return_values {
        [] => "None".into(),
        [value] => type_name(value),
        values => {
            let names = values.iter().map(type_name).collect::<Vec<_>>();
            format!("({})", names.join(", "))
        }
    }
}

fn procedure_docstring(
    procedure: &Procedure,
    params: &[HumanizedParam],
    returns: &[HumanizedParam],
    table: &TypeTable,
    procedure_names: &HashMap<String, String>,
    param_names: &HashMap<String, String>,
) -> String {
    let mut docstring = String::new();
    if !procedure.blurb.is_empty() {
        docstring.push_str(&procedure.blurb);
    }
    if !procedure.help.is_empty() && procedure.help != procedure.blurb {
        docstring.push_str("\n\n");
        docstring.push_str(&procedure.help);
    }
    docstring.push_str(&params_section(params, "Parameters:"));
    docstring.push_str(&params_section(returns, "Returns:"));

    let [truthy, falsy] = &table.bool_sentinels;
    docstring = docstring.replace(falsy.as_str(), "False");
    docstring = docstring.replace(truthy.as_str(), "True");
    docstring = quote_known_identifiers(&docstring, procedure_names);
    docstring = quote_known_identifiers(&docstring, param_names);

    docstring.trim().to_owned()
}

fn params_section(params: &[HumanizedParam], heading: &str) -> String {
    if params.is_empty() {
        return String::new();
    }
    let mut section = format!("\n\n{heading}");
    for param in params {
        let type_display = match &param.element {
            Some(element) => format!("{}({})", param.type_name, element),
            None => param.type_name.clone(),
        };
        section.push_str(&format!(
            "\n{} ({}): {}",
            param.name, type_display, param.description
        ));
    }
    section
}

fn pythonize(raw: &str) -> String {
    raw.replace('-', "_")
}

fn bool_phrase_component(truthy: &str, falsy: &str, one: &str, zero: &str) -> String {
    format!(
        r"[\.:]? *\(?{truthy}(  *or  *| *[/,] *){falsy}\)?|[\.:]? *\{{ *{truthy}( *\({one}\))?, *{falsy}( *\({zero}\))? *\}}"
    )
}

fn bool_phrase_components() -> String {
    format!(
        "{}|{}",
        bool_phrase_component("true", "false", "1", "0"),
        bool_phrase_component("false", "true", "0", "1")
    )
}

static BOOL_DESCRIPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)({}|true: .*false: |false: .*true: |\?$)",
        bool_phrase_components()
    ))
    .unwrap()
});

static BOOL_DESCRIPTION_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?i)({})$", bool_phrase_components())).unwrap());

/// An integer parameter documented with a true/false phrase carries boolean
/// semantics: render it as `bool` and strip the phrase when it trails the
/// description.
fn convert_int_param_to_bool(param: &mut HumanizedParam) {
    if param.type_name != "int" || !BOOL_DESCRIPTION.is_match(&param.description) {
        return;
    }
    param.type_name = "bool".into();
    param.element = None;
    param.description = BOOL_DESCRIPTION_SUFFIX
        .replace(&param.description, "")
        .into_owned();
}

static ENUM_SET_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.*\{ *)(.*?)( *\})$").unwrap());
static ENUM_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z][A-Z0-9-]+) *(\([0-9]+\))$").unwrap());
static ENUM_ITEM_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r", *").unwrap());

/// Rewrites a trailing `{ NAME-A (0), NAME-B (1) }` value set so that known
/// enumerated identifiers use their human-readable namespaced form.
fn pythonize_enum_names(description: &str, table: &TypeTable) -> String {
    let Some(groups) = ENUM_SET_SUFFIX.captures(description) else {
        return description.into();
    };
    let items = ENUM_ITEM_SEPARATOR
        .split(&groups[2])
        .map(|item| {
            let Some(item_groups) = ENUM_ITEM.captures(item) else {
                return item.to_owned();
            };
            let name = &item_groups[1];
            if table.enums.iter().any(|known| known == name) {
                format!(
                    "{}.{} {}",
                    table.enums_namespace,
                    pythonize(name),
                    &item_groups[2]
                )
            } else {
                format!("{} {}", name, &item_groups[2])
            }
        })
        .collect::<Vec<_>>();
    format!("{}{}{}", &groups[1], items.join(", "), &groups[3])
}

static CONSTRAINT_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.*)\((.*?)\)$").unwrap());
static CONSTRAINT_OPERATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r" +[<>]=? +").unwrap());

/// Rewrites raw parameter names inside a trailing parenthesized constraint,
/// e.g. `(width <= max-width)` becomes `(width <= max_width)`.
fn pythonize_constraint_suffix(description: &str, param_names: &HashMap<String, String>) -> String {
    let Some(groups) = CONSTRAINT_SUFFIX.captures(description) else {
        return description.into();
    };
    let constraint = &groups[2];
    let mut rewritten = String::new();
    let mut last = 0;
    for operator in CONSTRAINT_OPERATOR.find_iter(constraint) {
        rewritten.push_str(mapped_name(&constraint[last..operator.start()], param_names));
        rewritten.push_str(operator.as_str());
        last = operator.end();
    }
    rewritten.push_str(mapped_name(&constraint[last..], param_names));
    format!("{}({})", &groups[1], rewritten)
}

fn mapped_name<'a>(raw: &'a str, names: &'a HashMap<String, String>) -> &'a str {
    names.get(raw).map_or(raw, String::as_str)
}

static QUOTED_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'([A-Za-z_][A-Za-z0-9_-]*)'").unwrap());

/// Replaces `'raw-name'` quotes in prose with the backticked Python form for
/// names present in the map, leaving unknown quotes untouched.
fn quote_known_identifiers(text: &str, names: &HashMap<String, String>) -> String {
    QUOTED_IDENTIFIER
        .replace_all(text, |caps: &regex::Captures<'_>| {
            match names.get(&caps[1]) {
                Some(name) => format!("`{name}`"),
                None => caps[0].to_owned(),
            }
        })
        .into_owned()
}
