use crate::cli::GlobalFlags;

pub const DEFAULT_SHM_NAME: &str = "/shm_timemanager";
pub const DEFAULT_SEM_NAME: &str = "/sem_timemanager";

/// Resolves the registry index: the `-d` flag wins, then `TM_DB_NUM`, else
/// no index (the single shared default registry).
pub fn resolve_db_index(flag: Option<u8>) -> Option<u8> {
    flag.or_else(|| {
        std::env::var("TM_DB_NUM")
            .ok()
            .and_then(|v| v.parse::<u8>().ok())
            .filter(|v| (1..=5).contains(v))
    })
}

pub fn shm_name(index: Option<u8>) -> String {
    match index {
        Some(i) => format!("{DEFAULT_SHM_NAME}_{i}"),
        None => DEFAULT_SHM_NAME.to_owned(),
    }
}

pub fn sem_name(index: Option<u8>) -> String {
    match index {
        Some(i) => format!("{DEFAULT_SEM_NAME}_{i}"),
        None => DEFAULT_SEM_NAME.to_owned(),
    }
}

pub struct Names {
    pub shm: String,
    pub sem: String,
}

pub fn names_from(flags: &GlobalFlags) -> Names {
    let index = resolve_db_index(flags.db);
    Names {
        shm: shm_name(index),
        sem: sem_name(index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_takes_priority_over_env() {
        std::env::set_var("TM_DB_NUM", "3");
        assert_eq!(resolve_db_index(Some(2)), Some(2));
        std::env::remove_var("TM_DB_NUM");
    }

    #[test]
    fn out_of_range_env_value_is_ignored() {
        std::env::set_var("TM_DB_NUM", "9");
        assert_eq!(resolve_db_index(None), None);
        std::env::remove_var("TM_DB_NUM");
    }

    #[test]
    fn names_are_suffixed_by_index() {
        assert_eq!(shm_name(Some(2)), "/shm_timemanager_2");
        assert_eq!(sem_name(None), "/sem_timemanager");
    }
}
