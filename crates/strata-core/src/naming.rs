//! Default names for generated columns, tables and constraints.
//!
//! Names are deterministic so that a name computed while planning matches
//! the name reconstructed from an introspected table.

/// Column holding the ancestor id in a closure table.
pub const CLOSURE_ANCESTOR: &str = "ancestor";

/// Column holding the descendant id in a closure table.
pub const CLOSURE_DESCENDANT: &str = "descendant";

/// Column holding the depth of a closure row.
pub const CLOSURE_LEVEL: &str = "level";

/// Join column of an owning relation, e.g. `author_id`.
#[must_use]
pub fn join_column(property: &str, referenced_column: &str) -> String {
    format!("{property}_{referenced_column}")
}

/// Junction table backing an owning many-to-many relation.
#[must_use]
pub fn junction_table(owner_table: &str, property: &str, inverse_table: &str) -> String {
    format!("{owner_table}_{property}_{inverse_table}")
}

/// Junction column pointing at `table.column`.
#[must_use]
pub fn junction_column(table: &str, column: &str) -> String {
    format!("{table}_{column}")
}

/// Closure table of a tree entity.
#[must_use]
pub fn closure_table(table: &str) -> String {
    format!("{table}_closure")
}

/// Foreign key constraint name.
#[must_use]
pub fn foreign_key(table: &str, columns: &[String]) -> String {
    format!("FK_{table}_{}", columns.join("_"))
}

/// Unique constraint name.
#[must_use]
pub fn unique(table: &str, columns: &[String]) -> String {
    format!("UQ_{table}_{}", columns.join("_"))
}

/// Index name.
#[must_use]
pub fn index(table: &str, columns: &[String]) -> String {
    format!("IDX_{table}_{}", columns.join("_"))
}

/// Name of the scratch table used while a table is being recreated.
#[must_use]
pub fn temporary_table(prefix: &str, table: &str) -> String {
    format!("{prefix}{table}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(join_column("author", "id"), "author_id");
        assert_eq!(junction_table("post", "categories", "category"), "post_categories_category");
        assert_eq!(
            foreign_key("post", &["author_id".to_string()]),
            "FK_post_author_id"
        );
        assert_eq!(
            unique("user", &["email".to_string(), "tenant".to_string()]),
            "UQ_user_email_tenant"
        );
        assert_eq!(temporary_table("temporary_", "post"), "temporary_post");
    }
}
