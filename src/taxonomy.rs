//! Destination taxonomy and path classification
//!
//! The classifier maps a top-level source directory or loose file to its
//! destination subpath. Classification depends only on the entry's basename,
//! the entry kind, and the static map built once at startup; it never
//! consults file content or metadata.

use crate::config::Origin;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Windows system directories excluded by name wherever encountered
pub const EXCLUDED_DIR_NAMES: [&str; 2] = ["$RECYCLE.BIN", "System Volume Information"];

/// Extensions treated as images when routing loose top-level files
pub const IMAGE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "gif", "tif", "tiff", "bmp", "heic"];

/// Destination subpath for chkdsk recovery directories
pub const RECOVERY_SUBPATH: &str = "90_System_Artifacts/Recovered_found.000";

/// Top-level names that land at the destination root under the same name
pub const AS_IS_BUCKETS: [&str; 3] = ["ASH", "Backups", "Dropbox"];

/// Content-heavy destination buckets sampled by the hash verifier and
/// deduplicated by the hardlink pass
pub const CONTENT_HEAVY_BUCKETS: [&str; 7] = [
    "03_Knowledge_Training",
    "02_Media/Video",
    "05_Games",
    "06_Software/OS_Images",
    "06_Software/ESXi_VMs",
    "01_Personal",
    "04_Research",
];

/// Where the classifier routed an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Entry is a Windows system directory; the caller skips it entirely
    Excluded,
    /// Directory routed to a shared destination bucket. Shared buckets are
    /// reachable from both origins, so identical relative paths inside them
    /// collide and are handled by the resolver.
    Bucket(PathBuf),
    /// Directory with no taxonomy mapping, routed to an origin-scoped
    /// quarantine that can never collide across origins
    Unmapped(PathBuf),
    /// Loose top-level file (image or otherwise), routed to an origin-scoped
    /// directory; the returned path includes the file name
    LooseFile(PathBuf),
}

impl Route {
    /// Destination subpath relative to the destination root, if any
    #[must_use]
    pub fn subpath(&self) -> Option<&Path> {
        match self {
            Self::Excluded => None,
            Self::Bucket(p) | Self::Unmapped(p) | Self::LooseFile(p) => Some(p),
        }
    }
}

/// Static source-name to destination-subpath taxonomy
#[derive(Debug)]
pub struct Taxonomy {
    map: BTreeMap<&'static str, &'static str>,
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self::new()
    }
}

impl Taxonomy {
    /// Build the taxonomy map. Keys are matched exactly, case-sensitive.
    #[must_use]
    pub fn new() -> Self {
        let mut map = BTreeMap::new();
        map.insert("Pictures", "02_Media/Photos");
        map.insert("My Pictures", "02_Media/Photos");
        map.insert("AUDIO", "02_Media/Audio");
        map.insert("Music", "02_Media/Audio");
        map.insert("Video", "02_Media/Video");
        map.insert("Movies", "02_Media/Video");
        map.insert("Documents", "01_Personal/Documents");
        map.insert("Desktop", "01_Personal/Desktop");
        map.insert("Downloads", "01_Personal/Downloads");
        map.insert("Training", "03_Knowledge_Training");
        map.insert("Courses", "03_Knowledge_Training");
        map.insert("Books", "03_Knowledge_Training/Books");
        map.insert("Research", "04_Research");
        map.insert("Papers", "04_Research/Papers");
        map.insert("Games", "05_Games");
        map.insert("ISOs", "06_Software/OS_Images");
        map.insert("OS Images", "06_Software/OS_Images");
        map.insert("VMs", "06_Software/ESXi_VMs");
        map.insert("ESXi", "06_Software/ESXi_VMs");
        map.insert("Software", "06_Software/Installers");
        Self { map }
    }

    /// Classify a depth-1 directory of a source root
    #[must_use]
    pub fn classify_dir(&self, origin: Origin, name: &str) -> Route {
        if is_excluded_name(name) {
            return Route::Excluded;
        }
        if let Some(sub) = self.shared_bucket(name) {
            return Route::Bucket(sub);
        }
        Route::Unmapped(
            Path::new("90_System_Artifacts/Unmapped_Folders")
                .join(origin.label())
                .join(name),
        )
    }

    /// Classify a loose file at depth 1 of a source root
    #[must_use]
    pub fn classify_loose_file(&self, origin: Origin, name: &str) -> Route {
        let dir = if has_image_extension(name) {
            Path::new("02_Media/Photos/_From_Root").join(origin.label())
        } else {
            Path::new("90_System_Artifacts/Loose_Files").join(origin.label())
        };
        Route::LooseFile(dir.join(name))
    }

    /// Destination skeleton created by the prepare phase: every mapped
    /// bucket plus the fixed artifact directories
    #[must_use]
    pub fn skeleton_subpaths(&self) -> Vec<PathBuf> {
        let mut subpaths: Vec<PathBuf> = self.map.values().map(|s| PathBuf::from(*s)).collect();
        subpaths.extend(AS_IS_BUCKETS.iter().map(|s| PathBuf::from(*s)));
        subpaths.push(PathBuf::from(RECOVERY_SUBPATH));
        subpaths.push(PathBuf::from("02_Media/Photos/_From_Root"));
        subpaths.push(PathBuf::from("90_System_Artifacts/Unmapped_Folders"));
        subpaths.push(PathBuf::from("90_System_Artifacts/Loose_Files"));
        subpaths.push(PathBuf::from("90_System_Artifacts/Consolidation_Logs"));
        subpaths.sort();
        subpaths.dedup();
        subpaths
    }

    /// The shared (origin-independent) destination bucket for a top-level
    /// name, when one exists: a mapped taxonomy bucket, an as-is bucket, or
    /// the recovery directory. These are exactly the buckets in which the
    /// two origins can collide.
    #[must_use]
    pub fn shared_bucket(&self, name: &str) -> Option<PathBuf> {
        if name == "found.000" {
            return Some(PathBuf::from(RECOVERY_SUBPATH));
        }
        if AS_IS_BUCKETS.contains(&name) {
            return Some(PathBuf::from(name));
        }
        self.map.get(name).map(PathBuf::from)
    }
}

/// Whether a basename names an always-excluded Windows system directory
#[must_use]
pub fn is_excluded_name(name: &str) -> bool {
    EXCLUDED_DIR_NAMES.contains(&name)
}

/// OsStr convenience for walk filters
#[must_use]
pub fn is_excluded_os_name(name: &OsStr) -> bool {
    name.to_str().is_some_and(is_excluded_name)
}

fn has_image_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| {
            let lower = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&lower.as_str())
        })
}
