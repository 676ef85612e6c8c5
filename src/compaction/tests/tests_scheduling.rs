#[cfg(test)]
mod tests {
    use crate::compaction::{Levels, level_capacity, level_dir, needs_compact};
    use crate::sstable::SsTable;
    use tempfile::TempDir;

    fn add_table(levels: &mut Levels, tmp: &TempDir, level: u64, id: u64, ts: u64, keys: &[u64]) {
        let dir = level_dir(tmp.path(), level);
        std::fs::create_dir_all(&dir).unwrap();
        let entries: Vec<(u64, u64, u64)> = keys.iter().map(|&k| (k, k * 10, 1)).collect();
        let sst = SsTable::build_from_entries(ts, &entries, dir.join(format!("{id}.sst"))).unwrap();
        levels.entry(level).or_default().insert(id, sst);
    }

    #[test]
    fn capacity_doubles_per_level() {
        assert_eq!(level_capacity(0), 2);
        assert_eq!(level_capacity(1), 4);
        assert_eq!(level_capacity(2), 8);
        assert_eq!(level_capacity(5), 64);
    }

    #[test]
    fn quiescent_levels_need_no_compaction() {
        let tmp = TempDir::new().unwrap();
        let mut levels = Levels::new();

        add_table(&mut levels, &tmp, 0, 1, 1, &[1, 2]);
        add_table(&mut levels, &tmp, 0, 2, 2, &[3, 4]);
        assert_eq!(needs_compact(&levels), None);
    }

    #[test]
    fn smallest_overfull_level_is_reported() {
        let tmp = TempDir::new().unwrap();
        let mut levels = Levels::new();

        for id in 0..3u64 {
            add_table(&mut levels, &tmp, 0, id, id + 1, &[id * 10, id * 10 + 1]);
        }
        for id in 0..5u64 {
            add_table(&mut levels, &tmp, 1, id, id + 10, &[100 + id * 10]);
        }

        // Both L0 (3 > 2) and L1 (5 > 4) overflow; L0 wins.
        assert_eq!(needs_compact(&levels), Some(0));
    }

    #[test]
    fn empty_level_maps_are_ignored() {
        let mut levels = Levels::new();
        levels.entry(0).or_default();
        levels.entry(3).or_default();
        assert_eq!(needs_compact(&levels), None);
    }
}
