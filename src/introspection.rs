use crate::model::{Argument, Arguments, Attribute, Class, Function, Module};
use anyhow::{bail, Context, Result};
use goblin::elf::Elf;
use goblin::mach::{Mach, MachO, SingleArch};
use goblin::pe::PE;
use goblin::Object;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::Path;

/// Name of the metadata section in ELF and PE libraries.
const ELF_PE_SECTION_NAME: &str = ".pypredef0";
/// Name of the metadata section in Mach-O libraries, padded to 16 bytes.
const MACH_O_SECTION_NAME: [u8; 16] = *b"__pypredef0\0\0\0\0\0";

/// Introspect an extension library of the host application and return the
/// definition of the Python module it provides.
///
/// The library must carry a metadata section (see [`ELF_PE_SECTION_NAME`])
/// holding pointer+length records to JSON chunks describing the module
/// members. ELF (most *nix including Linux), Mach-O (macOS) and PE (Windows)
/// containers are supported.
pub fn introspect_library(library_path: impl AsRef<Path>, main_module_name: &str) -> Result<Module> {
    let library_path = library_path.as_ref();
    let chunks = find_metadata_chunks_in_binary_object(library_path)
        .with_context(|| format!("Failed to introspect {}", library_path.display()))?;
    parse_chunks(&chunks, main_module_name)
}

/// Removes the docstrings of the classes of every module whose dotted name
/// (`app`, `app.util`, ...) is listed in `module_names`.
///
/// Some host modules mirror docstrings of an underlying C library that are
/// useless for completion purposes and blow up the stub files. Module and
/// function docstrings are kept.
pub fn remove_class_docstrings(module: &mut Module, module_names: &[String]) {
    let dotted_name = module.name.clone();
    remove_listed_class_docstrings(module, &dotted_name, module_names);
}

fn remove_listed_class_docstrings(module: &mut Module, dotted_name: &str, module_names: &[String]) {
    if module_names.iter().any(|name| name == dotted_name) {
        for class in &mut module.classes {
            class.docstring = None;
        }
    }
    for submodule in &mut module.modules {
        let submodule_name = format!("{dotted_name}.{}", submodule.name);
        remove_listed_class_docstrings(submodule, &submodule_name, module_names);
    }
}

/// Builds the module tree from the metadata chunks found in the library
fn parse_chunks(chunks: &[Chunk], main_module_name: &str) -> Result<Module> {
    let chunks_by_id = chunks
        .iter()
        .map(|chunk| (chunk.id(), chunk))
        .collect::<HashMap<_, _>>();
    for chunk in chunks {
        if let Chunk::Module {
            name,
            members,
            docstring,
            id: _,
        } = chunk
        {
            if name == main_module_name {
                return Ok(parse_module(
                    name,
                    members,
                    docstring.as_deref(),
                    &chunks_by_id,
                ));
            }
        }
    }
    bail!("No module named {main_module_name} found in the library metadata")
}

fn parse_module(
    name: &str,
    members: &[String],
    docstring: Option<&str>,
    chunks_by_id: &HashMap<&str, &Chunk>,
) -> Module {
    let mut imports = BTreeSet::new();
    let mut modules = Vec::new();
    let mut class_builds = Vec::new();
    let mut functions = Vec::new();
    let mut attributes = Vec::new();
    for member in members {
        // Members without a resolvable chunk are skipped, the rest of the
        // module is still generated.
        let Some(&chunk) = chunks_by_id.get(member.as_str()) else {
            continue;
        };
        match chunk {
            Chunk::Module {
                name,
                members,
                docstring,
                id: _,
            } => {
                modules.push(parse_module(
                    name,
                    members,
                    docstring.as_deref(),
                    chunks_by_id,
                ));
            }
            Chunk::Class { .. } => {
                if let Some(build) = parse_class(chunk, chunks_by_id, &mut imports) {
                    class_builds.push(build);
                }
            }
            Chunk::Function { .. } => {
                if let Some(function) = parse_function(chunk, false) {
                    functions.push(function);
                }
            }
            Chunk::Attribute {
                name,
                type_name,
                id: _,
            } => {
                record_foreign_type(type_name, &mut imports);
                attributes.push(Attribute {
                    name: name.clone(),
                    type_name: type_name.clone(),
                });
            }
        }
    }

    remove_redundant_members_from_subclasses(&mut class_builds);
    let classes = sort_classes_by_hierarchy(class_builds);

    modules.sort_by(|l, r| l.name.cmp(&r.name));
    functions.sort_by(|l, r| l.name.cmp(&r.name));
    attributes.sort_by(|l, r| l.name.cmp(&r.name));

    Module {
        name: name.into(),
        imports: imports.into_iter().collect(),
        modules,
        classes,
        functions,
        attributes,
        docstring: docstring.map(Into::into),
    }
}

/// A class together with the chunk ids it needs for the inheritance passes
struct ClassBuild {
    id: String,
    base_ids: Vec<String>,
    class: Class,
}

fn parse_class(
    chunk: &Chunk,
    chunks_by_id: &HashMap<&str, &Chunk>,
    imports: &mut BTreeSet<String>,
) -> Option<ClassBuild> {
    let Chunk::Class {
        id,
        name,
        canonical_name,
        bases,
        members,
        docstring,
    } = chunk
    else {
        return None;
    };
    let mut base_names = Vec::new();
    let mut base_ids = Vec::new();
    for base in bases {
        if let Some(base_id) = &base.id {
            if let Some(Chunk::Class {
                name: base_name, ..
            }) = chunks_by_id.get(base_id.as_str())
            {
                base_names.push(base_name.clone());
                base_ids.push(base_id.clone());
                continue;
            }
        }
        // Base class defined in a foreign module: reference it by its fully
        // qualified name and record the module as an import dependency.
        if let Some(module) = &base.module {
            base_names.push(format!("{}.{}", module, base.name));
            imports.insert(module.clone());
        } else {
            base_names.push(base.name.clone());
        }
    }

    let mut methods = Vec::new();
    let mut attributes = Vec::new();
    for member in members {
        match chunks_by_id.get(member.as_str()).copied() {
            Some(chunk @ Chunk::Function { .. }) => {
                if let Some(method) = parse_function(chunk, true) {
                    methods.push(method);
                }
            }
            Some(Chunk::Attribute {
                name,
                type_name,
                id: _,
            }) => {
                record_foreign_type(type_name, imports);
                attributes.push(Attribute {
                    name: name.clone(),
                    type_name: type_name.clone(),
                });
            }
            _ => (),
        }
    }
    methods.sort_by(|l, r| l.name.cmp(&r.name));
    attributes.sort_by(|l, r| l.name.cmp(&r.name));

    Some(ClassBuild {
        id: id.clone(),
        base_ids,
        class: Class {
            name: name.clone(),
            canonical_name: canonical_name.clone().filter(|c| c != name),
            bases: base_names,
            attributes,
            methods,
            docstring: docstring.clone(),
        },
    })
}

fn parse_function(chunk: &Chunk, is_method: bool) -> Option<Function> {
    let Chunk::Function {
        name,
        args,
        vararg,
        kwarg,
        docstring,
        id: _,
    } = chunk
    else {
        return None;
    };
    let mut args = args
        .iter()
        .map(|arg| Argument {
            name: arg.name.clone(),
            default_value: arg.default_value.clone(),
        })
        .collect::<Vec<_>>();
    if is_method && args.is_empty() {
        // The receiver is not recorded for members without a resolvable
        // signature, add it back
        args.push(Argument {
            name: "self".into(),
            default_value: None,
        });
    }
    Some(Function {
        name: name.clone(),
        arguments: Arguments {
            args,
            vararg: vararg.clone(),
            kwarg: kwarg.clone(),
        },
        docstring: docstring.clone(),
        returns: None,
    })
}

/// Drops from each class the members that are structurally identical to a
/// member of one of its direct base classes.
///
/// The comparison always runs against the base class members as introspected,
/// not against what remains of them after their own dedup pass.
fn remove_redundant_members_from_subclasses(class_builds: &mut [ClassBuild]) {
    let originals = class_builds
        .iter()
        .map(|build| {
            (
                build.id.clone(),
                (build.class.methods.clone(), build.class.attributes.clone()),
            )
        })
        .collect::<HashMap<_, _>>();
    for build in class_builds.iter_mut() {
        for base_id in &build.base_ids {
            if let Some((base_methods, base_attributes)) = originals.get(base_id) {
                build
                    .class
                    .methods
                    .retain(|method| !base_methods.contains(method));
                build
                    .class
                    .attributes
                    .retain(|attribute| !base_attributes.contains(attribute));
            }
        }
    }
}

/// Orders classes so that every base class precedes the classes derived from
/// it (reverse resolution order), keeping the input order among unrelated
/// classes.
fn sort_classes_by_hierarchy(class_builds: Vec<ClassBuild>) -> Vec<Class> {
    let local_ids = class_builds
        .iter()
        .map(|build| build.id.clone())
        .collect::<HashSet<_>>();
    let mut emitted = HashSet::new();
    let mut remaining = class_builds;
    let mut classes = Vec::new();
    while !remaining.is_empty() {
        let mut progressed = false;
        let mut i = 0;
        while i < remaining.len() {
            let ready = remaining[i]
                .base_ids
                .iter()
                .all(|base| emitted.contains(base) || !local_ids.contains(base));
            if ready {
                let build = remaining.remove(i);
                emitted.insert(build.id);
                classes.push(build.class);
                progressed = true;
            } else {
                i += 1;
            }
        }
        if !progressed {
            // The metadata declares an inheritance cycle, keep the input order
            classes.extend(remaining.drain(..).map(|build| build.class));
        }
    }
    classes
}

fn record_foreign_type(type_name: &str, imports: &mut BTreeSet<String>) {
    if let Some((module, _)) = type_name.rsplit_once('.') {
        imports.insert(module.into());
    }
}

fn find_metadata_chunks_in_binary_object(path: &Path) -> Result<Vec<Chunk>> {
    let library_content = fs::read(path).context("Failed to read the extension library")?;
    match Object::parse(&library_content)
        .context("The extension library is not valid or not supported by our binary parser")?
    {
        Object::Elf(elf) => find_metadata_chunks_in_elf(&elf, &library_content),
        Object::Mach(Mach::Binary(macho)) => {
            find_metadata_chunks_in_macho(&macho, &library_content)
        }
        Object::Mach(Mach::Fat(multi_arch)) => {
            for arch in &multi_arch {
                match arch? {
                    SingleArch::MachO(macho) => {
                        return find_metadata_chunks_in_macho(&macho, &library_content)
                    }
                    SingleArch::Archive(_) => (),
                }
            }
            bail!("No Mach-O chunk found in the multi-arch Mach-O container")
        }
        Object::PE(pe) => find_metadata_chunks_in_pe(&pe, &library_content),
        _ => {
            bail!("Only ELF, Mach-O and PE containers can be introspected")
        }
    }
}

fn find_metadata_chunks_in_elf(elf: &Elf<'_>, library_content: &[u8]) -> Result<Vec<Chunk>> {
    let metadata_section_header = elf
        .section_headers
        .iter()
        .find(|section| {
            elf.shdr_strtab.get_at(section.sh_name).unwrap_or_default() == ELF_PE_SECTION_NAME
        })
        .with_context(|| format!("No {ELF_PE_SECTION_NAME} section found"))?;
    let sh_offset =
        usize::try_from(metadata_section_header.sh_offset).context("Section offset overflow")?;
    let sh_size =
        usize::try_from(metadata_section_header.sh_size).context("Section len overflow")?;
    // The header values are untrusted, a truncated library must not panic
    let section = sh_offset
        .checked_add(sh_size)
        .and_then(|end| library_content.get(sh_offset..end))
        .with_context(|| {
            format!("The {ELF_PE_SECTION_NAME} section lies outside of the library file")
        })?;
    Ok(if elf.is_64 {
        read_section_with_ptr_and_len_64bits(section, 0, library_content)
    } else {
        read_section_with_ptr_and_len_32bits(section, 0, library_content)
    })
}

fn find_metadata_chunks_in_macho(
    macho: &MachO<'_>,
    library_content: &[u8],
) -> Result<Vec<Chunk>> {
    if !macho.little_endian {
        bail!("Only little endian Mach-O binaries are supported");
    }
    let text_segment = macho
        .segments
        .iter()
        .find(|s| s.segname == *b"__TEXT\0\0\0\0\0\0\0\0\0\0")
        .context("No __TEXT segment found")?;
    let (_, metadata_section) = text_segment
        .sections()?
        .into_iter()
        .find(|s| s.0.sectname == MACH_O_SECTION_NAME)
        .context("No __pypredef0 section found")?;
    Ok(if macho.is_64 {
        read_section_with_ptr_and_len_64bits(metadata_section, 0, library_content)
    } else {
        read_section_with_ptr_and_len_32bits(metadata_section, 0, library_content)
    })
}

fn find_metadata_chunks_in_pe(pe: &PE<'_>, library_content: &[u8]) -> Result<Vec<Chunk>> {
    let rdata_data_section = pe
        .sections
        .iter()
        .find(|section| section.name().unwrap_or_default() == ".rdata")
        .context("No .rdata section found")?;
    let rdata_shift = pe_section_shift(
        pe.image_base,
        rdata_data_section.virtual_address,
        rdata_data_section.pointer_to_raw_data,
    )?;
    let metadata_section = pe
        .sections
        .iter()
        .find(|section| section.name().unwrap_or_default() == ELF_PE_SECTION_NAME)
        .with_context(|| format!("No {ELF_PE_SECTION_NAME} section found"))?;
    let metadata = metadata_section
        .data(library_content)?
        .with_context(|| format!("Not able to find the {ELF_PE_SECTION_NAME} section content"))?;
    Ok(if pe.is_64 {
        read_section_with_ptr_and_len_64bits(&metadata, rdata_shift, library_content)
    } else {
        read_section_with_ptr_and_len_32bits(&metadata, rdata_shift, library_content)
    })
}

/// Computes the value subtracted from the virtual addresses stored in a PE
/// metadata table to get raw file offsets, from the image base and the
/// layout of the section the table points into.
fn pe_section_shift(
    image_base: u64,
    virtual_address: u32,
    pointer_to_raw_data: u32,
) -> Result<usize> {
    let image_base = usize::try_from(image_base).context("Image base overflow")?;
    let virtual_address =
        usize::try_from(virtual_address).context(".rdata virtual_address overflow")?;
    let pointer_to_raw_data =
        usize::try_from(pointer_to_raw_data).context(".rdata pointer_to_raw_data overflow")?;
    image_base
        .checked_add(virtual_address)
        .and_then(|shifted| shifted.checked_sub(pointer_to_raw_data))
        .context(".rdata section shift overflow")
}

fn read_section_with_ptr_and_len_32bits(
    slice: &[u8],
    shift: usize,
    full_library_content: &[u8],
) -> Vec<Chunk> {
    slice
        .chunks_exact(8)
        .filter_map(|element| {
            let (ptr, len) = element.split_at(4);
            let ptr = usize::try_from(u32::from_le_bytes(ptr.try_into().unwrap())).ok()?;
            let len = usize::try_from(u32::from_le_bytes(len.try_into().unwrap())).ok()?;
            if ptr == 0 || len == 0 {
                // Zero padding, also emitted in PE containers
                return None;
            }
            let start = ptr.checked_sub(shift)?;
            let chunk = full_library_content.get(start..start.checked_add(len)?)?;
            // A chunk that cannot be decoded is skipped, the remaining
            // members are still generated
            serde_json::from_slice(chunk).ok()
        })
        .collect()
}

fn read_section_with_ptr_and_len_64bits(
    slice: &[u8],
    shift: usize,
    full_library_content: &[u8],
) -> Vec<Chunk> {
    slice
        .chunks_exact(16)
        .filter_map(|element| {
            let (ptr, len) = element.split_at(8);
            let ptr = usize::try_from(u64::from_le_bytes(ptr.try_into().unwrap())).ok()?;
            let len = usize::try_from(u64::from_le_bytes(len.try_into().unwrap())).ok()?;
            if ptr == 0 || len == 0 {
                return None;
            }
            let start = ptr.checked_sub(shift)?;
            let chunk = full_library_content.get(start..start.checked_add(len)?)?;
            serde_json::from_slice(chunk).ok()
        })
        .collect()
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Chunk {
    Module {
        id: String,
        name: String,
        #[serde(default)]
        members: Vec<String>,
        #[serde(default)]
        docstring: Option<String>,
    },
    Class {
        id: String,
        name: String,
        /// Fully qualified name reported by the class itself, when it differs
        /// from the name the module binds it to.
        #[serde(default)]
        canonical_name: Option<String>,
        #[serde(default)]
        bases: Vec<BaseRef>,
        #[serde(default)]
        members: Vec<String>,
        #[serde(default)]
        docstring: Option<String>,
    },
    Function {
        id: String,
        name: String,
        #[serde(default)]
        args: Vec<ArgChunk>,
        #[serde(default)]
        vararg: Option<String>,
        #[serde(default)]
        kwarg: Option<String>,
        #[serde(default)]
        docstring: Option<String>,
    },
    Attribute {
        id: String,
        name: String,
        type_name: String,
    },
}

impl Chunk {
    fn id(&self) -> &str {
        match self {
            Chunk::Module { id, .. }
            | Chunk::Class { id, .. }
            | Chunk::Function { id, .. }
            | Chunk::Attribute { id, .. } => id,
        }
    }
}

/// Reference to a base class, either by chunk id (declared in the same
/// library) or by name and defining module (foreign).
#[derive(Deserialize)]
struct BaseRef {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    module: Option<String>,
}

#[derive(Deserialize)]
struct ArgChunk {
    name: String,
    #[serde(default)]
    default_value: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(json: &str) -> Vec<Chunk> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parse_module_tree() {
        let chunks = chunks(
            r#"[
                {"type": "module", "id": "m", "name": "app", "members": ["f", "c", "a", "s"], "docstring": "The app module."},
                {"type": "module", "id": "s", "name": "util", "members": []},
                {"type": "class", "id": "c", "name": "Image", "members": ["f2"]},
                {"type": "function", "id": "f", "name": "version", "args": []},
                {"type": "function", "id": "f2", "name": "flatten", "args": [{"name": "self"}, {"name": "discard", "default_value": "False"}]},
                {"type": "attribute", "id": "a", "name": "VERSION", "type_name": "str"}
            ]"#,
        );
        let module = parse_chunks(&chunks, "app").unwrap();
        assert_eq!(module.name, "app");
        assert_eq!(module.docstring.as_deref(), Some("The app module."));
        assert_eq!(module.modules.len(), 1);
        assert_eq!(module.modules[0].name, "util");
        assert_eq!(module.classes.len(), 1);
        assert_eq!(module.classes[0].methods[0].name, "flatten");
        assert_eq!(
            module.classes[0].methods[0].arguments.args[1]
                .default_value
                .as_deref(),
            Some("False")
        );
        assert_eq!(module.functions[0].name, "version");
        assert_eq!(module.attributes[0].name, "VERSION");
    }

    #[test]
    fn unknown_members_are_skipped() {
        let chunks = chunks(
            r#"[
                {"type": "module", "id": "m", "name": "app", "members": ["f", "missing"]},
                {"type": "function", "id": "f", "name": "version"}
            ]"#,
        );
        let module = parse_chunks(&chunks, "app").unwrap();
        assert_eq!(module.functions.len(), 1);
    }

    #[test]
    fn missing_root_module_is_an_error() {
        let chunks = chunks(r#"[{"type": "module", "id": "m", "name": "app"}]"#);
        assert!(parse_chunks(&chunks, "other").is_err());
    }

    #[test]
    fn inherited_members_are_deduplicated() {
        let chunks = chunks(
            r#"[
                {"type": "module", "id": "m", "name": "app", "members": ["a", "b"]},
                {"type": "class", "id": "a", "name": "A", "members": ["f1", "at"]},
                {"type": "class", "id": "b", "name": "B", "bases": [{"id": "a", "name": "A"}], "members": ["f2", "g", "at2"]},
                {"type": "function", "id": "f1", "name": "save", "args": [{"name": "self"}, {"name": "path"}]},
                {"type": "function", "id": "f2", "name": "save", "args": [{"name": "self"}, {"name": "path"}]},
                {"type": "function", "id": "g", "name": "save", "args": [{"name": "self"}, {"name": "path"}, {"name": "mode"}]},
                {"type": "attribute", "id": "at", "name": "kind", "type_name": "str"},
                {"type": "attribute", "id": "at2", "name": "kind", "type_name": "str"}
            ]"#,
        );
        let module = parse_chunks(&chunks, "app").unwrap();
        let a = &module.classes[0];
        let b = &module.classes[1];
        assert_eq!(a.name, "A");
        assert_eq!(a.methods.len(), 1);
        assert_eq!(b.name, "B");
        // The identical `save(self, path)` is dropped, the overload with an
        // extra parameter is kept
        assert_eq!(b.methods.len(), 1);
        assert_eq!(b.methods[0].arguments.args.len(), 3);
        assert!(b.attributes.is_empty());
    }

    #[test]
    fn fully_inherited_subclass_renders_empty() {
        let chunks = chunks(
            r#"[
                {"type": "module", "id": "m", "name": "app", "members": ["b", "a"]},
                {"type": "class", "id": "a", "name": "A", "members": ["f1", "at"]},
                {"type": "class", "id": "b", "name": "B", "bases": [{"id": "a", "name": "A"}], "members": ["f2", "at2"]},
                {"type": "function", "id": "f1", "name": "close", "args": [{"name": "self"}]},
                {"type": "function", "id": "f2", "name": "close", "args": [{"name": "self"}]},
                {"type": "attribute", "id": "at", "name": "ID", "type_name": "int"},
                {"type": "attribute", "id": "at2", "name": "ID", "type_name": "int"}
            ]"#,
        );
        let module = parse_chunks(&chunks, "app").unwrap();
        // B is declared first but A must precede it in the output
        assert_eq!(module.classes[0].name, "A");
        assert_eq!(module.classes[0].methods.len(), 1);
        assert_eq!(module.classes[0].attributes.len(), 1);
        assert_eq!(module.classes[1].name, "B");
        assert!(module.classes[1].methods.is_empty());
        assert!(module.classes[1].attributes.is_empty());
    }

    #[test]
    fn foreign_base_is_fully_qualified_and_imported() {
        let chunks = chunks(
            r#"[
                {"type": "module", "id": "m", "name": "app", "members": ["c"]},
                {"type": "class", "id": "c", "name": "Window", "bases": [{"name": "Widget", "module": "toolkit"}]}
            ]"#,
        );
        let module = parse_chunks(&chunks, "app").unwrap();
        assert_eq!(module.classes[0].bases, vec!["toolkit.Widget".to_string()]);
        assert_eq!(module.imports, vec!["toolkit".to_string()]);
    }

    #[test]
    fn canonical_name_is_kept_only_when_it_differs() {
        let chunks = chunks(
            r#"[
                {"type": "module", "id": "m", "name": "app", "members": ["c", "d"]},
                {"type": "class", "id": "c", "name": "Layer", "canonical_name": "app.Layer"},
                {"type": "class", "id": "d", "name": "Image", "canonical_name": "Image"}
            ]"#,
        );
        let module = parse_chunks(&chunks, "app").unwrap();
        assert_eq!(
            module.classes[0].canonical_name.as_deref(),
            Some("app.Layer")
        );
        assert_eq!(module.classes[1].canonical_name, None);
    }

    #[test]
    fn receiver_is_injected_for_methods_without_signature() {
        let chunks = chunks(
            r#"[
                {"type": "module", "id": "m", "name": "app", "members": ["c"]},
                {"type": "class", "id": "c", "name": "Image", "members": ["f"]},
                {"type": "function", "id": "f", "name": "builtin_method"}
            ]"#,
        );
        let module = parse_chunks(&chunks, "app").unwrap();
        let method = &module.classes[0].methods[0];
        assert_eq!(method.arguments.args.len(), 1);
        assert_eq!(method.arguments.args[0].name, "self");
    }

    #[test]
    fn class_docstrings_are_stripped_for_listed_modules() {
        let chunks = chunks(
            r#"[
                {"type": "module", "id": "m", "name": "app", "members": ["c", "f", "s"], "docstring": "The app module."},
                {"type": "module", "id": "s", "name": "util", "members": ["c2"]},
                {"type": "class", "id": "c", "name": "Image", "docstring": "An image."},
                {"type": "class", "id": "c2", "name": "Timer", "docstring": "A timer."},
                {"type": "function", "id": "f", "name": "version", "docstring": "Returns the version."}
            ]"#,
        );
        let mut module = parse_chunks(&chunks, "app").unwrap();
        remove_class_docstrings(&mut module, &["app".into(), "app.util".into()]);
        assert_eq!(module.classes[0].docstring, None);
        assert_eq!(module.modules[0].classes[0].docstring, None);
        // Module and function docstrings are not touched
        assert_eq!(module.docstring.as_deref(), Some("The app module."));
        assert_eq!(
            module.functions[0].docstring.as_deref(),
            Some("Returns the version.")
        );
    }

    #[test]
    fn class_docstrings_of_unlisted_submodules_are_kept() {
        let chunks = chunks(
            r#"[
                {"type": "module", "id": "m", "name": "app", "members": ["c", "s"]},
                {"type": "module", "id": "s", "name": "util", "members": ["c2"]},
                {"type": "class", "id": "c", "name": "Image", "docstring": "An image."},
                {"type": "class", "id": "c2", "name": "Timer", "docstring": "A timer."}
            ]"#,
        );
        let mut module = parse_chunks(&chunks, "app").unwrap();
        remove_class_docstrings(&mut module, &["app".into()]);
        assert_eq!(module.classes[0].docstring, None);
        assert_eq!(
            module.modules[0].classes[0].docstring.as_deref(),
            Some("A timer.")
        );
    }

    /// 64-bit little endian ELF shared object with a `.pypredef0` section
    /// header pointing at the given file range. Layout: ELF header, section
    /// name string table, three section headers (null, metadata, strtab).
    fn elf_library(metadata_offset: u64, metadata_size: u64) -> Vec<u8> {
        let mut bytes = vec![0u8; 64];
        bytes[..4].copy_from_slice(b"\x7fELF");
        bytes[4] = 2; // 64-bit
        bytes[5] = 1; // little endian
        bytes[6] = 1; // e_ident version
        bytes[16..18].copy_from_slice(&3u16.to_le_bytes()); // ET_DYN
        bytes[18..20].copy_from_slice(&62u16.to_le_bytes()); // x86-64
        bytes[20..24].copy_from_slice(&1u32.to_le_bytes()); // e_version
        let strtab = b"\0.pypredef0\0.shstrtab\0";
        let strtab_offset = bytes.len() as u64;
        bytes.extend_from_slice(strtab);
        while bytes.len() % 8 != 0 {
            bytes.push(0);
        }
        let section_headers_offset = bytes.len() as u64;
        bytes[40..48].copy_from_slice(&section_headers_offset.to_le_bytes()); // e_shoff
        bytes[52..54].copy_from_slice(&64u16.to_le_bytes()); // e_ehsize
        bytes[58..60].copy_from_slice(&64u16.to_le_bytes()); // e_shentsize
        bytes[60..62].copy_from_slice(&3u16.to_le_bytes()); // e_shnum
        bytes[62..64].copy_from_slice(&2u16.to_le_bytes()); // e_shstrndx
        bytes.extend_from_slice(&[0u8; 64]); // null section
        bytes.extend_from_slice(&section_header(1, 1, metadata_offset, metadata_size));
        bytes.extend_from_slice(&section_header(
            12,
            3,
            strtab_offset,
            strtab.len() as u64,
        ));
        bytes
    }

    fn section_header(sh_name: u32, sh_type: u32, sh_offset: u64, sh_size: u64) -> [u8; 64] {
        let mut header = [0u8; 64];
        header[..4].copy_from_slice(&sh_name.to_le_bytes());
        header[4..8].copy_from_slice(&sh_type.to_le_bytes());
        header[24..32].copy_from_slice(&sh_offset.to_le_bytes());
        header[32..40].copy_from_slice(&sh_size.to_le_bytes());
        header
    }

    #[test]
    fn elf_metadata_section_is_decoded() {
        let json = br#"{"type": "module", "id": "m", "name": "app"}"#;
        // The builder layout is fixed, the chunk and its pointer table are
        // appended right after the section headers
        let json_offset = 280u64;
        let table_offset = json_offset + json.len() as u64;
        let mut content = elf_library(table_offset, 16);
        assert_eq!(content.len() as u64, json_offset);
        content.extend_from_slice(json);
        content.extend_from_slice(&json_offset.to_le_bytes());
        content.extend_from_slice(&(json.len() as u64).to_le_bytes());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libapp.so");
        fs::write(&path, &content).unwrap();
        let module = introspect_library(&path, "app").unwrap();
        assert_eq!(module.name, "app");
    }

    #[test]
    fn truncated_library_with_out_of_bounds_section_is_an_error() {
        // The section header claims content far beyond the end of the file
        let content = elf_library(0x10000, 0x100);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libapp.so");
        fs::write(&path, &content).unwrap();
        let error = introspect_library(&path, "app").unwrap_err();
        let rendered = format!("{error:#}");
        assert!(rendered.contains("libapp.so"), "{rendered}");
        assert!(rendered.contains("outside"), "{rendered}");
    }

    #[test]
    fn pe_shift_combines_image_base_and_section_layout() {
        assert_eq!(
            pe_section_shift(0x40_0000, 0x2000, 0x1600).unwrap(),
            0x40_0A00
        );
    }

    #[test]
    fn pe_shift_underflow_is_an_error() {
        assert!(pe_section_shift(0, 0x100, 0x200).is_err());
    }

    #[test]
    fn read_ptr_len_table_skips_invalid_records() {
        let content = br#"xx{"type": "module", "id": "m", "name": "app"}not json"#;
        let chunk_start = 2u64;
        let chunk_len = 44u64;
        let mut section = Vec::new();
        section.extend_from_slice(&chunk_start.to_le_bytes());
        section.extend_from_slice(&chunk_len.to_le_bytes());
        // Zero padding record
        section.extend_from_slice(&[0; 16]);
        // Record pointing at data that is not a valid chunk
        section.extend_from_slice(&46u64.to_le_bytes());
        section.extend_from_slice(&8u64.to_le_bytes());
        // Record pointing out of bounds
        section.extend_from_slice(&1024u64.to_le_bytes());
        section.extend_from_slice(&8u64.to_le_bytes());
        let chunks = read_section_with_ptr_and_len_64bits(&section, 0, content);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id(), "m");
    }
}
