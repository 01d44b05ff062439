use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;
use tsuite_core::atomic_write_bytes;

/// `a/b/c.js` -> `a/b/`; a path without a directory is its own prefix.
pub fn directory_prefix(path: &str) -> &str {
    match path.rfind('/') {
        Some(index) => &path[..=index],
        None => path,
    }
}

/// Prefixes recorded by the previous gate run; an absent file means none.
pub fn read_prefixes(file: &Path) -> io::Result<Vec<String>> {
    let text = match fs::read_to_string(file) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Rewrites the file with the directory prefixes of `failed`, or deletes it
/// when nothing failed.
pub fn store_prefixes<'a, I>(file: &Path, failed: I) -> io::Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    let prefixes: Vec<&str> = failed
        .into_iter()
        .map(directory_prefix)
        .filter(|prefix| seen.insert(*prefix))
        .collect();
    if prefixes.is_empty() {
        return match fs::remove_file(file) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        };
    }
    let mut text = prefixes.join("\n");
    text.push('\n');
    atomic_write_bytes(file, text.as_bytes())
}

/// Tests under a recorded prefix first (prefix order, then the given order),
/// followed by everything else. Each index appears once.
pub fn resume_order(paths: &[&str], ordered: &[usize], prefixes: &[String]) -> Vec<usize> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(ordered.len());
    for prefix in prefixes {
        for &index in ordered {
            if paths[index].starts_with(prefix.as_str()) && seen.insert(index) {
                out.push(index);
            }
        }
    }
    out.extend(ordered.iter().copied().filter(|index| seen.insert(*index)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn prefix_is_directory_including_slash() {
        assert_eq!(directory_prefix("built-ins/Array/from.js"), "built-ins/Array/");
        assert_eq!(directory_prefix("top.js"), "top.js");
    }

    #[test]
    fn store_then_read_and_delete_when_empty() {
        let file = std::env::temp_dir()
            .join(format!(
                "tsuite_resume_{}_{}",
                std::process::id(),
                Utc::now().timestamp_micros()
            ))
            .join("suite.failed");
        store_prefixes(&file, ["d/x.js", "a/y.js", "d/z.js", "top.js"]).expect("store");
        assert_eq!(fs::read_to_string(&file).expect("read"), "d/\na/\ntop.js\n");
        assert_eq!(read_prefixes(&file).expect("read"), vec!["d/", "a/", "top.js"]);

        store_prefixes(&file, std::iter::empty()).expect("clear");
        assert!(!file.exists());
        assert!(read_prefixes(&file).expect("absent").is_empty());
        store_prefixes(&file, std::iter::empty()).expect("clear twice");
        if let Some(parent) = file.parent() {
            let _ = fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn resumed_directories_come_first() {
        let paths = ["a/1.js", "d/1.js", "d/2.js", "e/1.js", "d/sub/3.js"];
        let ordered = [0, 1, 2, 4, 3];
        let order = resume_order(&paths, &ordered, &["d/".to_string()]);
        assert_eq!(order, vec![1, 2, 4, 0, 3]);
        assert_eq!(resume_order(&paths, &ordered, &[]), ordered.to_vec());
    }
}
