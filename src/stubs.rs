use crate::model::{Attribute, Class, Function, Module};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Generates the predefined completion stubs of a module and its submodules.
/// It returns a map between the file name and the file content.
/// Each module gets a flat `<dotted.module.name>.pypredef` file, the layout
/// the completion indexer expects.
pub fn module_stub_files(module: &Module) -> BTreeMap<PathBuf, String> {
    let mut output_files = BTreeMap::new();
    add_module_stub_files(module, "", &mut output_files);
    output_files
}

fn add_module_stub_files(
    module: &Module,
    parent_path: &str,
    output_files: &mut BTreeMap<PathBuf, String>,
) {
    let dotted_name = if parent_path.is_empty() {
        module.name.clone()
    } else {
        format!("{parent_path}.{}", module.name)
    };
    output_files.insert(
        PathBuf::from(format!("{dotted_name}.pypredef")),
        module_stubs(module),
    );
    for submodule in &module.modules {
        add_module_stub_files(submodule, &dotted_name, output_files);
    }
}

/// Generates the module stubs to a String, not including submodules
fn module_stubs(module: &Module) -> String {
    let mut elements = Vec::new();
    if let Some(docstring) = &module.docstring {
        elements.push(format!("\"\"\"\n{docstring}\n\"\"\""));
    }
    for import in &module.imports {
        elements.push(format!("import {import}"));
    }
    for class in &module.classes {
        elements.push(class_stubs(class));
    }
    for function in &module.functions {
        elements.push(function_stubs(function));
    }
    // Module-level variables go last, after the definitions they may refer to
    for attribute in &module.attributes {
        elements.push(attribute_stubs(attribute));
    }

    let mut output = String::new();

    // We insert two line jumps (i.e. empty strings) only above and below multiple line elements (classes, functions)
    for element in elements {
        let is_multiline = element.contains('\n');
        if is_multiline && !output.is_empty() && !output.ends_with("\n\n") {
            output.push('\n');
        }
        output.push_str(&element);
        output.push('\n');
        if is_multiline {
            output.push('\n');
        }
    }

    // We remove a line jump at the end if they are two
    if output.ends_with("\n\n") {
        output.pop();
    }
    output
}

fn class_stubs(class: &Class) -> String {
    let mut buffer = String::new();
    buffer.push_str("class ");
    buffer.push_str(&class.name);
    if !class.bases.is_empty() {
        buffer.push('(');
        buffer.push_str(&class.bases.join(", "));
        buffer.push(')');
    }
    buffer.push(':');
    if class.docstring.is_none()
        && class.canonical_name.is_none()
        && class.attributes.is_empty()
        && class.methods.is_empty()
    {
        buffer.push_str("\n    pass");
        return buffer;
    }
    if let Some(docstring) = &class.docstring {
        buffer.push_str("\n    \"\"\"");
        for line in docstring.lines() {
            buffer.push_str("\n    ");
            buffer.push_str(line);
        }
        buffer.push_str("\n    \"\"\"");
    }
    if let Some(canonical_name) = &class.canonical_name {
        // The class reports a name that differs from the binding name, keep
        // the true identity visible to the completion indexer
        buffer.push_str("\n    __name__ = \"");
        buffer.push_str(canonical_name);
        buffer.push('"');
    }
    // Class-level variables go before the methods
    for attribute in &class.attributes {
        buffer.push_str("\n    ");
        buffer.push_str(&attribute_stubs(attribute));
    }
    for method in &class.methods {
        // We do the indentation
        buffer.push_str("\n    ");
        buffer.push_str(&function_stubs(method).replace('\n', "\n    "));
    }
    buffer
}

fn function_stubs(function: &Function) -> String {
    let mut parameters = Vec::new();
    for argument in &function.arguments.args {
        match &argument.default_value {
            Some(default_value) => parameters.push(format!("{}={}", argument.name, default_value)),
            None => parameters.push(argument.name.clone()),
        }
    }
    if let Some(vararg) = &function.arguments.vararg {
        parameters.push(format!("*{vararg}"));
    }
    if let Some(kwarg) = &function.arguments.kwarg {
        parameters.push(format!("**{kwarg}"));
    }
    let mut buffer = String::new();
    buffer.push_str("def ");
    buffer.push_str(&function.name);
    buffer.push('(');
    buffer.push_str(&parameters.join(", "));
    buffer.push_str("):");
    if let Some(docstring) = &function.docstring {
        buffer.push_str("\n    \"\"\"");
        for line in docstring.lines() {
            buffer.push_str("\n    ");
            buffer.push_str(line);
        }
        buffer.push_str("\n    \"\"\"");
    }
    match &function.returns {
        Some(returns) => {
            buffer.push_str("\n    return ");
            buffer.push_str(returns);
        }
        None => buffer.push_str("\n    pass"),
    }
    buffer
}

fn attribute_stubs(attribute: &Attribute) -> String {
    format!("{} = {}", attribute.name, attribute.type_name)
}
