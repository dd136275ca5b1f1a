// EN: src/core/loader.rs

use std::{fs, io, path::Path};

/// Reads a whole script or template file. The content must be UTF-8.
pub fn read_script_file(path: &Path) -> io::Result<String> {
    let path = shellexpand::tilde(&path.to_string_lossy()).into_owned();
    let path = dunce::simplified(Path::new(&path));
    log::debug!("Loading script source from '{}'", path.display());
    fs::read_to_string(path)
}
