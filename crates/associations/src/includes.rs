//! Association include trees for eager loading
//!
//! `Includes` is the shape both loading strategies walk: a single association name, a
//! list of entries, or a map from association name to nested includes.

use std::fmt;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::error::{OrmError, OrmResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Includes {
    Name(String),
    List(Vec<Includes>),
    Nested(IndexMap<String, Includes>),
}

impl Includes {
    /// Nothing to include
    pub fn none() -> Self {
        Includes::List(Vec::new())
    }

    /// `name` with `children` loaded on its targets
    pub fn nested(name: impl Into<String>, children: impl Into<Includes>) -> Self {
        let mut map = IndexMap::new();
        map.insert(name.into(), children.into());
        Includes::Nested(map)
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Includes::Name(_) => false,
            Includes::List(items) => items.iter().all(Includes::is_empty),
            Includes::Nested(map) => map.is_empty(),
        }
    }

    /// Top-level association names, in order of appearance and without repeats
    pub fn names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Includes::Name(name) => {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
            Includes::List(items) => items.iter().for_each(|item| item.collect_names(names)),
            Includes::Nested(map) => {
                for name in map.keys() {
                    if !names.contains(&name.as_str()) {
                        names.push(name);
                    }
                }
            }
        }
    }

    /// Parse a dotted path such as `posts.comments.author`
    pub fn path(path: &str) -> Self {
        let mut segments = path.split('.').map(str::trim).filter(|s| !s.is_empty()).rev();
        let leaf = match segments.next() {
            Some(leaf) => Includes::Name(leaf.to_string()),
            None => return Includes::none(),
        };
        segments.fold(leaf, |child, parent| Includes::nested(parent, child))
    }
}

impl Default for Includes {
    fn default() -> Self {
        Includes::none()
    }
}

impl fmt::Display for Includes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Includes::Name(name) => f.write_str(name),
            Includes::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Includes::Nested(map) => {
                f.write_str("{")?;
                for (i, (name, children)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", name, children)?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<&str> for Includes {
    fn from(value: &str) -> Self {
        Includes::path(value)
    }
}

impl From<String> for Includes {
    fn from(value: String) -> Self {
        Includes::path(&value)
    }
}

impl From<&String> for Includes {
    fn from(value: &String) -> Self {
        Includes::path(value)
    }
}

impl<T: Into<Includes>> From<Vec<T>> for Includes {
    fn from(items: Vec<T>) -> Self {
        Includes::List(items.into_iter().map(Into::into).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Includes {
    fn from(items: [&str; N]) -> Self {
        Includes::List(items.iter().map(|item| Includes::path(item)).collect())
    }
}

impl TryFrom<&JsonValue> for Includes {
    type Error = OrmError;

    fn try_from(value: &JsonValue) -> OrmResult<Self> {
        match value {
            JsonValue::Null => Ok(Includes::none()),
            JsonValue::String(path) => Ok(Includes::path(path)),
            JsonValue::Array(items) => items
                .iter()
                .map(Includes::try_from)
                .collect::<OrmResult<Vec<_>>>()
                .map(Includes::List),
            JsonValue::Object(map) => map
                .iter()
                .map(|(name, children)| Ok((name.clone(), Includes::try_from(children)?)))
                .collect::<OrmResult<IndexMap<_, _>>>()
                .map(Includes::Nested),
            other => Err(OrmError::Configuration(format!(
                "Invalid includes entry: {}",
                other
            ))),
        }
    }
}

impl TryFrom<JsonValue> for Includes {
    type Error = OrmError;

    fn try_from(value: JsonValue) -> OrmResult<Self> {
        Includes::try_from(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dotted_path() {
        let includes = Includes::from("posts.comments.author");
        assert_eq!(
            includes,
            Includes::nested("posts", Includes::nested("comments", "author"))
        );
        assert_eq!(includes.names(), vec!["posts"]);
        assert_eq!(Includes::from("books"), Includes::Name("books".into()));
    }

    #[test]
    fn test_from_json() {
        let includes = Includes::try_from(json!(["author", {"comments": ["author", "post"]}])).unwrap();
        assert_eq!(includes.names(), vec!["author", "comments"]);
        assert_eq!(includes.to_string(), "[author, {comments: [author, post]}]");

        assert!(Includes::try_from(json!(42)).is_err());
        assert!(Includes::try_from(json!(null)).unwrap().is_empty());
    }

    #[test]
    fn test_emptiness() {
        assert!(Includes::none().is_empty());
        assert!(Includes::from(Vec::<&str>::new()).is_empty());
        assert!(!Includes::from(vec!["tags"]).is_empty());
    }
}
