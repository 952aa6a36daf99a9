//! This module implements the `table` cipher for fallback compatibility

use std::sync::Arc;

use bytes::BytesMut;
use md5::{Digest, Md5};

use super::{cipher::CipherResult, stream::StreamCipher, CryptoMode};

const TABLE_SIZE: usize = 256;

/// Password-derived byte permutation and its inverse
pub struct SubstitutionTable {
    encrypt: [u8; TABLE_SIZE],
    decrypt: [u8; TABLE_SIZE],
}

impl SubstitutionTable {
    /// Derive the table from `password`
    ///
    /// Every round re-sorts the previous round's output, so the sort must be stable
    /// to stay compatible with the other implementations.
    pub fn new(password: &[u8]) -> SubstitutionTable {
        let digest = Md5::digest(password);

        let mut a_bytes = [0u8; 8];
        a_bytes.copy_from_slice(&digest[..8]);
        let a = u64::from_le_bytes(a_bytes);

        let mut table = (0..TABLE_SIZE as u64).collect::<Vec<u64>>();
        for i in 1..1024u64 {
            table.sort_by_key(|x| a % (x + i));
        }

        let mut encrypt = [0u8; TABLE_SIZE];
        let mut decrypt = [0u8; TABLE_SIZE];
        for (idx, x) in table.into_iter().enumerate() {
            encrypt[idx] = x as u8;
            decrypt[x as usize] = idx as u8;
        }

        SubstitutionTable { encrypt, decrypt }
    }

    /// Forward permutation
    pub fn encrypt_table(&self) -> &[u8; TABLE_SIZE] {
        &self.encrypt
    }

    /// Inverse permutation
    pub fn decrypt_table(&self) -> &[u8; TABLE_SIZE] {
        &self.decrypt
    }
}

/// `table` method as a `StreamCipher`
pub struct TableCipher {
    table: Arc<SubstitutionTable>,
    mode: CryptoMode,
}

impl TableCipher {
    /// Reuse an already derived table
    pub fn with_table(table: Arc<SubstitutionTable>, mode: CryptoMode) -> TableCipher {
        TableCipher { table, mode }
    }
}

impl StreamCipher for TableCipher {
    fn update(&mut self, data: &[u8], out: &mut BytesMut) -> CipherResult<()> {
        let table = match self.mode {
            CryptoMode::Encrypt => self.table.encrypt_table(),
            CryptoMode::Decrypt => self.table.decrypt_table(),
        };

        out.reserve(data.len());
        out.extend(data.iter().map(|b| table[*b as usize]));
        Ok(())
    }

    fn finalize(&mut self, _out: &mut BytesMut) -> CipherResult<()> {
        Ok(())
    }
}
