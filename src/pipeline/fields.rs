use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;

/// The `needs` keyword: a single job name, or a list mixing plain names and
/// `{job: name}` maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Needs {
    Single(String),
    List(Vec<NeedEntry>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NeedEntry {
    Name(String),
    Job(NeedRef),
    /// Cross-pipeline or cross-project needs that do not reference a local job.
    Other(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeedRef {
    pub job: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

impl Needs {
    /// Canonical ordered list of local job names this `needs` declaration references.
    pub fn job_names(&self) -> Vec<String> {
        match self {
            Needs::Single(name) => vec![name.clone()],
            Needs::List(entries) => entries
                .iter()
                .filter_map(|entry| match entry {
                    NeedEntry::Name(name) => Some(name.clone()),
                    NeedEntry::Job(need) => Some(need.job.clone()),
                    NeedEntry::Other(_) => None,
                })
                .collect(),
        }
    }
}

/// The `extends` keyword: one parent or several.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Extends {
    Single(String),
    Many(Vec<String>),
}

impl Extends {
    pub fn names(&self) -> Vec<String> {
        match self {
            Extends::Single(name) => vec![name.clone()],
            Extends::Many(names) => names.clone(),
        }
    }
}

/// The `parallel` keyword: a plain instance count or a `matrix:` expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Parallel {
    Count(u32),
    Matrix {
        matrix: Vec<IndexMap<String, Value>>,
    },
}

impl Parallel {
    /// Number of job instances this declaration expands to.
    ///
    /// Each matrix entry contributes the product of its value-list lengths
    /// (scalars count as one value). Saturates at `u32::MAX`.
    pub fn instances(&self) -> u32 {
        match self {
            Parallel::Count(count) => *count,
            Parallel::Matrix { matrix } => matrix
                .iter()
                .map(|entry| {
                    entry
                        .values()
                        .map(|value| match value {
                            Value::Sequence(items) => u32::try_from(items.len()).unwrap_or(u32::MAX).max(1),
                            _ => 1,
                        })
                        .fold(1, u32::saturating_mul)
                })
                .fold(0, u32::saturating_add),
        }
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self, Parallel::Matrix { .. })
    }
}

/// Accepts either a single string or a list of strings (`script: "make"` vs `script: [make]`).
pub(super) fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<Value>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(line)) => vec![line],
        // Nested sequences come from YAML anchors spliced into a script list.
        Some(OneOrMany::Many(items)) => items.into_iter().flat_map(flatten_lines).collect(),
    })
}

fn flatten_lines(value: Value) -> Vec<String> {
    match value {
        Value::String(line) => vec![line],
        Value::Sequence(items) => items.into_iter().flat_map(flatten_lines).collect(),
        Value::Number(n) => vec![n.to_string()],
        Value::Bool(b) => vec![b.to_string()],
        _ => Vec::new(),
    }
}

/// Accepts `image: node:20` as well as `image: {name: node:20, entrypoint: [...]}`.
pub(super) fn image_name<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Image {
        Name(String),
        Detailed { name: String },
    }

    Ok(Option::<Image>::deserialize(deserializer)?.map(|image| match image {
        Image::Name(name) | Image::Detailed { name } => name,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(test)]
    mod needs {
        use super::*;

        #[test]
        fn single_string_normalizes_to_one_name() {
            let needs: Needs = serde_yaml::from_str("build").unwrap();
            assert_eq!(needs.job_names(), vec!["build"]);
        }

        #[test]
        fn mixed_list_keeps_declaration_order() {
            let needs: Needs = serde_yaml::from_str(
                "- lint\n- job: build\n  artifacts: false\n- pipeline: $PARENT_PIPELINE_ID\n",
            )
            .unwrap();

            assert_eq!(
                needs.job_names(),
                vec!["lint", "build"],
                "cross-pipeline entries carry no local job name"
            );
        }

        #[test]
        fn empty_list_is_distinct_from_absent() {
            let needs: Needs = serde_yaml::from_str("[]").unwrap();
            assert!(needs.job_names().is_empty());
            assert_eq!(needs, Needs::List(Vec::new()));
        }
    }

    #[cfg(test)]
    mod extends {
        use super::*;

        #[test]
        fn single_and_list_forms() {
            let single: Extends = serde_yaml::from_str(".base").unwrap();
            let many: Extends = serde_yaml::from_str("[.base, .cache]").unwrap();

            assert_eq!(single.names(), vec![".base"]);
            assert_eq!(many.names(), vec![".base", ".cache"]);
        }
    }

    #[cfg(test)]
    mod parallel {
        use super::*;

        #[test]
        fn count_form() {
            let parallel: Parallel = serde_yaml::from_str("4").unwrap();
            assert_eq!(parallel.instances(), 4);
            assert!(!parallel.is_matrix());
        }

        #[test]
        fn matrix_multiplies_value_lists_per_entry() {
            let parallel: Parallel = serde_yaml::from_str(
                "matrix:\n  - NODE_VERSION: ['18', '20', '22']\n    OS: [linux, mac]\n  - NODE_VERSION: '16'\n",
            )
            .unwrap();

            assert!(parallel.is_matrix());
            assert_eq!(parallel.instances(), 3 * 2 + 1);
        }

        #[test]
        fn huge_matrix_saturates() {
            let values = (0..100).map(|i| i.to_string()).collect::<Vec<_>>().join(", ");
            let entry = ["A", "B", "C", "D", "E"]
                .iter()
                .map(|key| format!("{key}: [{values}]"))
                .collect::<Vec<_>>()
                .join(", ");
            let yaml = format!("matrix:\n  - {{{entry}}}\n  - {{{entry}}}\n");
            let parallel: Parallel = serde_yaml::from_str(&yaml).unwrap();

            assert_eq!(parallel.instances(), u32::MAX, "100^5 instances per entry overflow u32");
        }
    }
}
