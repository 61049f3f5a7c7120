//! Convenience macros for defining update sets.

/// Declare an update set inline as `version => script` pairs.
///
/// Expands to a `Vec<`[`Update`](crate::Update)`>` in the order written. The order does not
/// matter to the updater, which always applies pending updates by ascending version.
///
/// ```
/// use dbupdater::update_set;
///
/// let updates = update_set![
///     201810230925 => "CREATE TABLE person (id INTEGER PRIMARY KEY, firstname TEXT)",
///     201810230926 => "CREATE TABLE car (id INTEGER PRIMARY KEY, model TEXT)",
/// ];
/// assert_eq!(updates.len(), 2);
/// assert_eq!(updates[1].version, 201810230926);
/// ```
///
/// Scripts can be any expression that converts into a `String`, for example files embedded
/// at compile time:
///
/// ```ignore
/// let updates = dbupdater::update_set![
///     1 => include_str!("../sql/0001_create_users.sql"),
///     2 => include_str!("../sql/0002_add_email.sql"),
/// ];
/// ```
#[macro_export]
macro_rules! update_set {
    ($($version:expr => $script:expr),* $(,)?) => {
        vec![$($crate::Update::new($version, $script)),*]
    };
}

#[cfg(test)]
mod tests {
    use crate::Update;

    #[test]
    fn builds_updates_in_written_order() {
        let owned = String::from("CREATE TABLE b (id INTEGER)");
        let updates = update_set![
            2 => owned,
            1 => "CREATE TABLE a (id INTEGER)",
        ];
        assert_eq!(
            updates,
            vec![
                Update::new(2, "CREATE TABLE b (id INTEGER)"),
                Update::new(1, "CREATE TABLE a (id INTEGER)"),
            ]
        );
    }

    #[test]
    fn empty_set() {
        let updates: Vec<Update> = update_set![];
        assert!(updates.is_empty());
    }
}
