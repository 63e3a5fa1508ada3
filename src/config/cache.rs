//! On-disk cache of evaluated task scripts
//!
//! The cache holds the option overlay of the last configure run followed by the
//! complete task registry, both bincode-encoded.

use crate::config::types::TaskRegistry;
use crate::error::{CacheError, CacheResult};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Option overlay stored alongside the registry
pub type OptionValues = BTreeMap<String, String>;

/// Write the option overlay and the registry to `path`
pub fn write_cache(path: &Path, options: &OptionValues, registry: &TaskRegistry) -> CacheResult<()> {
    let io_err = |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };

    let handle = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(handle);

    bincode::serialize_into(&mut writer, options).map_err(CacheError::Encode)?;
    bincode::serialize_into(&mut writer, registry).map_err(CacheError::Encode)?;
    writer.flush().map_err(io_err)?;

    debug!(path = %path.display(), tasks = registry.len(), "wrote task cache");
    Ok(())
}

/// Read a cache written by [`write_cache`]. A missing file is a cache miss.
pub fn read_cache(path: &Path) -> CacheResult<Option<(OptionValues, TaskRegistry)>> {
    let handle = match File::open(path) {
        Ok(handle) => handle,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CacheError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let mut reader = BufReader::new(handle);

    let decode_err = |source| CacheError::Decode {
        path: path.to_path_buf(),
        source,
    };
    let options: OptionValues = bincode::deserialize_from(&mut reader).map_err(decode_err)?;
    let registry: TaskRegistry = bincode::deserialize_from(&mut reader).map_err(decode_err)?;

    debug!(path = %path.display(), tasks = registry.len(), "read task cache");
    Ok(Some((options, registry)))
}
