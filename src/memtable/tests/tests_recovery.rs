#[cfg(test)]
mod tests {
    use crate::memtable::{Memtable, MemtableGetResult};
    use tempfile::TempDir;

    #[test]
    fn replay_restores_entries() {
        let tmp = TempDir::new().unwrap();
        let wal_path = tmp.path().join("WAL.log");

        {
            let mut mt = Memtable::new(&wal_path).unwrap();
            mt.put(1, b"one".to_vec()).unwrap();
            mt.put(2, b"two".to_vec()).unwrap();
            mt.del(1).unwrap();
            // Dropped without reset — simulates a crash.
        }

        let mt = Memtable::new(&wal_path).unwrap();
        assert_eq!(mt.get(1), MemtableGetResult::Deleted);
        assert_eq!(mt.get(2), MemtableGetResult::Found(b"two".to_vec()));
    }

    #[test]
    fn replay_restores_size_counter() {
        let tmp = TempDir::new().unwrap();
        let wal_path = tmp.path().join("WAL.log");

        let expected = {
            let mut mt = Memtable::new(&wal_path).unwrap();
            mt.put(10, b"abcdef".to_vec()).unwrap();
            mt.put(20, b"x".to_vec()).unwrap();
            mt.del(30).unwrap();
            mt.put(10, b"shorter?no".to_vec()).unwrap();
            mt.projected_sst_size()
        };

        let mt = Memtable::new(&wal_path).unwrap();
        assert_eq!(mt.projected_sst_size(), expected);
    }

    #[test]
    fn replay_after_reset_is_empty() {
        let tmp = TempDir::new().unwrap();
        let wal_path = tmp.path().join("WAL.log");

        {
            let mut mt = Memtable::new(&wal_path).unwrap();
            mt.put(1, b"one".to_vec()).unwrap();
            mt.reset().unwrap();
        }

        let mt = Memtable::new(&wal_path).unwrap();
        assert!(mt.is_empty());
    }
}
