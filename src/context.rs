//! Shadowsocks service context

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use bytes::Bytes;
use log::trace;

use crate::crypto::{bytes_to_key, SubstitutionTable};

/// Service context
///
/// Holds the key material and substitution tables derived from passwords. Both are
/// deterministic, so entries are computed on first use and kept for the context's lifetime.
#[derive(Default)]
pub struct Context {
    keys: Mutex<HashMap<(String, usize, usize), (Bytes, Bytes)>>,
    tables: Mutex<HashMap<String, Arc<SubstitutionTable>>>,
}

/// `Context` for sharing between services
pub type SharedContext = Arc<Context>;

impl Context {
    /// Create a new `Context`
    pub fn new() -> Context {
        Context::default()
    }

    /// Create a new `Context` shared
    pub fn new_shared() -> SharedContext {
        SharedContext::new(Context::new())
    }

    /// `EVP_BytesToKey` of `password`, memoized by `(password, key_len, iv_len)`
    pub fn key_material(&self, password: &str, key_len: usize, iv_len: usize) -> (Bytes, Bytes) {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        keys.entry((password.to_owned(), key_len, iv_len))
            .or_insert_with(|| {
                trace!("deriving key material, key_len: {}, iv_len: {}", key_len, iv_len);
                bytes_to_key(password.as_bytes(), key_len, iv_len)
            })
            .clone()
    }

    /// Substitution table of `password`, memoized by password
    pub fn substitution_table(&self, password: &str) -> Arc<SubstitutionTable> {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        tables
            .entry(password.to_owned())
            .or_insert_with(|| {
                trace!("building substitution table");
                Arc::new(SubstitutionTable::new(password.as_bytes()))
            })
            .clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_context_memoize() {
        let context = Context::new();

        let t1 = context.substitution_table("foobar!");
        let t2 = context.substitution_table("foobar!");
        assert!(Arc::ptr_eq(&t1, &t2));

        let t3 = context.substitution_table("barfoo!");
        assert!(!Arc::ptr_eq(&t1, &t3));

        let (k1, iv1) = context.key_material("password", 16, 16);
        let (k2, iv2) = context.key_material("password", 16, 16);
        assert_eq!(k1, k2);
        assert_eq!(iv1, iv2);

        let (k3, _) = context.key_material("password", 32, 16);
        assert_eq!(&k3[..16], &k1[..]);
    }
}
