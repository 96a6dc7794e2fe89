// rust/tfbundle-core/src/params.rs

//! Mapping between a model's parameter tree and flat checkpoint names.
//!
//! Models expose their tensors through [`NamedParameters`]. Walking the tree
//! produces names such as `encoder/layers/[0]/attention/query/kernel`:
//!
//! - labeled children contribute their label, with `_1`, `_2`, ... appended
//!   when a label repeats within the same parent;
//! - unlabeled children contribute `[i]`, counting unlabeled children only;
//! - a child whose `TypeName.label` is listed in
//!   [`FlattenOptions::ignored`] is skipped together with its subtree;
//! - the [`NameMap`] is applied to each complete generated name.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use tracing::warn;

use crate::checkpoint::{CheckpointReader, TensorData};
use crate::error::{BundleError, Result};

/// A child of a module: a tensor leaf or a nested module.
pub enum Parameter<'a> {
    Tensor(&'a TensorData),
    Module(&'a dyn NamedParameters),
}

/// Mutable counterpart of [`Parameter`].
pub enum ParameterMut<'a> {
    Tensor(&'a mut TensorData),
    Module(&'a mut dyn NamedParameters),
}

/// A node of a model's parameter tree.
///
/// `parameters` and `parameters_mut` must list the same children with the
/// same labels in the same order.
pub trait NamedParameters {
    /// Type name used in ignore paths (`TypeName.label`).
    fn type_name(&self) -> &str;

    fn parameters(&self) -> Vec<(Option<String>, Parameter<'_>)>;

    fn parameters_mut(&mut self) -> Vec<(Option<String>, ParameterMut<'_>)>;
}

impl<T: NamedParameters> NamedParameters for Vec<T> {
    fn type_name(&self) -> &str {
        "Array"
    }

    fn parameters(&self) -> Vec<(Option<String>, Parameter<'_>)> {
        self.iter()
            .map(|item| (None, Parameter::Module(item as &dyn NamedParameters)))
            .collect()
    }

    fn parameters_mut(&mut self) -> Vec<(Option<String>, ParameterMut<'_>)> {
        self.iter_mut()
            .map(|item| (None, ParameterMut::Module(item as &mut dyn NamedParameters)))
            .collect()
    }
}

/// Rewrites generated names into checkpoint names.
#[derive(Default)]
pub enum NameMap {
    #[default]
    Identity,
    /// Names missing from the table are kept as generated.
    Table(HashMap<String, String>),
    Function(Box<dyn Fn(&str) -> String + Send + Sync>),
}

impl NameMap {
    pub fn table<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::Table(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn function(f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self::Function(Box::new(f))
    }

    pub fn apply(&self, name: &str) -> String {
        match self {
            NameMap::Identity => name.to_string(),
            NameMap::Table(table) => table.get(name).cloned().unwrap_or_else(|| name.to_string()),
            NameMap::Function(f) => f(name),
        }
    }
}

impl fmt::Debug for NameMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameMap::Identity => f.write_str("Identity"),
            NameMap::Table(table) => f.debug_tuple("Table").field(&table.len()).finish(),
            NameMap::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// How a parameter tree is turned into names.
#[derive(Debug)]
pub struct FlattenOptions {
    pub separator: String,
    /// `TypeName.label` entries to skip.
    pub ignored: HashSet<String>,
    pub name_map: NameMap,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            separator: "/".to_string(),
            ignored: HashSet::new(),
            name_map: NameMap::Identity,
        }
    }
}

impl FlattenOptions {
    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    #[must_use]
    pub fn ignore(mut self, path: impl Into<String>) -> Self {
        self.ignored.insert(path.into());
        self
    }

    #[must_use]
    pub fn with_name_map(mut self, name_map: NameMap) -> Self {
        self.name_map = name_map;
        self
    }
}

/// Assigns unique labels to the children of one module.
#[derive(Debug, Default)]
pub struct LabelCounter {
    seen: HashMap<String, usize>,
    unlabeled: usize,
}

impl LabelCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unique label for the next child.
    pub fn next_label(&mut self, label: Option<&str>) -> String {
        match label {
            Some(label) => {
                let count = self.seen.entry(label.to_string()).or_insert(0);
                let unique = if *count == 0 {
                    label.to_string()
                } else {
                    format!("{label}_{count}")
                };
                *count += 1;
                unique
            }
            None => {
                let unique = format!("[{}]", self.unlabeled);
                self.unlabeled += 1;
                unique
            }
        }
    }
}

fn join(scope: Option<&str>, label: &str, separator: &str) -> String {
    match scope {
        Some(scope) => format!("{scope}{separator}{label}"),
        None => label.to_string(),
    }
}

fn visit<'m>(
    module: &'m dyn NamedParameters,
    scope: Option<&str>,
    options: &FlattenOptions,
    out: &mut Vec<(String, &'m TensorData)>,
) {
    let type_name = module.type_name();
    let mut counter = LabelCounter::new();
    for (label, child) in module.parameters() {
        let unique = counter.next_label(label.as_deref());
        if options.ignored.contains(&format!("{type_name}.{unique}")) {
            continue;
        }
        let path = join(scope, &unique, &options.separator);
        match child {
            Parameter::Tensor(tensor) => out.push((path, tensor)),
            Parameter::Module(inner) => visit(inner, Some(&path), options, out),
        }
    }
}

fn visit_mut(
    module: &mut dyn NamedParameters,
    scope: Option<&str>,
    options: &FlattenOptions,
    f: &mut dyn FnMut(String, &mut TensorData) -> Result<()>,
) -> Result<()> {
    let type_name = module.type_name().to_string();
    let mut counter = LabelCounter::new();
    for (label, child) in module.parameters_mut() {
        let unique = counter.next_label(label.as_deref());
        if options.ignored.contains(&format!("{type_name}.{unique}")) {
            continue;
        }
        let path = join(scope, &unique, &options.separator);
        match child {
            ParameterMut::Tensor(tensor) => f(path, tensor)?,
            ParameterMut::Module(inner) => visit_mut(inner, Some(&path), options, f)?,
        }
    }
    Ok(())
}

/// Checkpoint names of every tensor, in visitation order.
pub fn tensor_names(model: &dyn NamedParameters, options: &FlattenOptions) -> Vec<String> {
    let mut leaves = Vec::new();
    visit(model, None, options, &mut leaves);
    leaves
        .into_iter()
        .map(|(path, _)| options.name_map.apply(&path))
        .collect()
}

/// Flattens a model into the mapping consumed by the checkpoint writer.
///
/// If two tensors end up with the same name the later one wins and a
/// warning is logged.
pub fn flatten(model: &dyn NamedParameters, options: &FlattenOptions) -> BTreeMap<String, TensorData> {
    let mut leaves = Vec::new();
    visit(model, None, options, &mut leaves);

    let mut tensors = BTreeMap::new();
    for (path, tensor) in leaves {
        let name = options.name_map.apply(&path);
        if tensors.insert(name.clone(), tensor.clone()).is_some() {
            warn!(name = %name, "two different tensors were flattened to the same name");
        }
    }
    tensors
}

/// Loads every tensor of `model` from `reader`, matching names the same way
/// [`flatten`] generates them. Returns the number of tensors assigned.
///
/// Each loaded tensor must have the shape and dtype of the tensor it
/// replaces. All tensors are loaded and checked before the first one is
/// replaced, so on error the model is left unchanged.
pub fn assign(
    model: &mut dyn NamedParameters,
    reader: &mut CheckpointReader,
    options: &FlattenOptions,
) -> Result<usize> {
    let mut leaves = Vec::new();
    visit(&*model, None, options, &mut leaves);

    let mut loaded = Vec::with_capacity(leaves.len());
    for (path, current) in leaves {
        let name = options.name_map.apply(&path);
        let tensor = reader.load_tensor(&name)?;
        if tensor.shape != current.shape || tensor.dtype != current.dtype {
            return Err(BundleError::invalid_tensor(
                name,
                format!(
                    "checkpoint holds {} {:?}, model expects {} {:?}",
                    tensor.dtype.name(),
                    tensor.shape,
                    current.dtype.name(),
                    current.shape
                ),
            ));
        }
        loaded.push(tensor);
    }

    let assigned = loaded.len();
    let mut loaded = loaded.into_iter();
    visit_mut(model, None, options, &mut |_path: String, slot: &mut TensorData| -> Result<()> {
        if let Some(tensor) = loaded.next() {
            *slot = tensor;
        }
        Ok(())
    })?;
    Ok(assigned)
}
