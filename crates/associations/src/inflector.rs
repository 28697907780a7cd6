//! Naming conventions used to derive class names, table names and key columns

use heck::{ToSnakeCase, ToUpperCamelCase};

/// `Admin::BlogPost` -> `BlogPost`
pub fn demodulize(name: &str) -> &str {
    name.rsplit("::").next().unwrap_or(name)
}

/// `BlogPost` -> `blog_post`
pub fn underscore(name: &str) -> String {
    demodulize(name).to_snake_case()
}

/// `blog_post` -> `BlogPost`
pub fn camelize(name: &str) -> String {
    name.to_upper_camel_case()
}

pub fn pluralize(word: &str) -> String {
    pluralizer::pluralize(word, 2, false)
}

pub fn singularize(word: &str) -> String {
    pluralizer::pluralize(word, 1, false)
}

/// `BlogPost` -> `blog_posts`
pub fn tableize(name: &str, plural: bool) -> String {
    let table = underscore(name);
    if plural {
        pluralize(&table)
    } else {
        table
    }
}

/// `Admin::BlogPost` -> `blog_post_id`
pub fn foreign_key(name: &str) -> String {
    format!("{}_id", underscore(name))
}
