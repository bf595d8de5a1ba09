//! # Trail Reference
//!
//! Loads named trail datasets and flattens their line geometries into a flat
//! list of [`TrailSegment`]s.
//!
//! Datasets are GeoJSON-like documents: a FeatureCollection, a single Feature,
//! a bare LineString / MultiLineString, or a GeometryCollection. Only line
//! geometries contribute segments. Segments join consecutive points of the
//! same line, never points of different lines or features.
//!
//! ## Failure policy
//!
//! A dataset that fails to fetch or parse is logged and skipped. When nothing
//! loads, the reference is empty and every activity segment will classify as
//! off-trail.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::cache::TrailCache;
use crate::{GeoPoint, Result, TrailMatchError};

// ============================================================================
// Types
// ============================================================================

/// One edge of the trail network.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailSegment {
    pub start: GeoPoint,
    pub end: GeoPoint,
}

impl TrailSegment {
    pub fn new(start: GeoPoint, end: GeoPoint) -> Self {
        Self { start, end }
    }
}

/// The flattened trail network that activities are matched against.
///
/// Read-only once loaded; share it with `Arc` across match calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrailReference {
    segments: Vec<TrailSegment>,
    /// Datasets that contributed to this reference
    pub loaded: Vec<String>,
    /// Datasets that failed to fetch or parse
    pub failed: Vec<String>,
}

impl TrailReference {
    /// Build a reference directly from segments.
    pub fn from_segments(segments: Vec<TrailSegment>) -> Self {
        Self {
            segments,
            loaded: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn segments(&self) -> &[TrailSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

// ============================================================================
// Trail Sources
// ============================================================================

/// Storage that resolves a logical dataset name to document bytes.
pub trait TrailSource: Send + Sync {
    /// Fetch the raw document for `name`.
    fn fetch(&self, name: &str) -> Result<Vec<u8>>;
}

/// Datasets stored as `<root>/<name>.geojson` on the local filesystem.
#[derive(Debug, Clone)]
pub struct DirectoryTrailSource {
    root: PathBuf,
}

impl DirectoryTrailSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the document backing `name`.
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.starts_with('.') || name.contains(|c: char| c == '/' || c == '\\') {
            return Err(TrailMatchError::reference_load(name, "invalid dataset name"));
        }
        Ok(self.root.join(format!("{}.geojson", name)))
    }

    /// Replace the document for `name`.
    ///
    /// Writes to a temporary file first so readers never observe a partial
    /// document.
    pub fn store(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(name)?;
        fs::create_dir_all(&self.root)?;
        let tmp = path.with_extension("geojson.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        debug!("[TrailStore] Wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }
}

impl TrailSource for DirectoryTrailSource {
    fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_for(name)?;
        fs::read(&path).map_err(|e| {
            TrailMatchError::reference_load(name, format!("{}: {}", path.display(), e))
        })
    }
}

// ============================================================================
// GeoJSON Parsing
// ============================================================================

/// Top-level document shapes accepted for a dataset.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Document {
    FeatureCollection {
        #[serde(default)]
        features: Vec<Feature>,
    },
    Feature {
        geometry: Option<Geometry>,
    },
    LineString {
        coordinates: Vec<Vec<f64>>,
    },
    MultiLineString {
        coordinates: Vec<Vec<Vec<f64>>>,
    },
    GeometryCollection {
        #[serde(default)]
        geometries: Vec<Geometry>,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Geometry {
    LineString {
        coordinates: Vec<Vec<f64>>,
    },
    MultiLineString {
        coordinates: Vec<Vec<Vec<f64>>>,
    },
    GeometryCollection {
        #[serde(default)]
        geometries: Vec<Geometry>,
    },
    #[serde(other)]
    Unsupported,
}

/// Parse a dataset document into trail segments.
///
/// Fails only when the bytes are not a recognisable document; geometries
/// other than lines are skipped.
pub fn parse_trail_document(name: &str, data: &[u8]) -> Result<Vec<TrailSegment>> {
    let document: Document = serde_json::from_slice(data)
        .map_err(|e| TrailMatchError::reference_load(name, e.to_string()))?;

    let mut segments = Vec::new();
    match document {
        Document::FeatureCollection { features } => {
            for feature in features {
                if let Some(geometry) = feature.geometry {
                    collect_geometry(geometry, &mut segments);
                }
            }
        }
        Document::Feature { geometry } => {
            if let Some(geometry) = geometry {
                collect_geometry(geometry, &mut segments);
            }
        }
        Document::LineString { coordinates } => collect_line(&coordinates, &mut segments),
        Document::MultiLineString { coordinates } => {
            for line in &coordinates {
                collect_line(line, &mut segments);
            }
        }
        Document::GeometryCollection { geometries } => {
            for geometry in geometries {
                collect_geometry(geometry, &mut segments);
            }
        }
        Document::Unsupported => {
            return Err(TrailMatchError::reference_load(
                name,
                "document has no line geometries",
            ));
        }
    }
    Ok(segments)
}

fn collect_geometry(geometry: Geometry, segments: &mut Vec<TrailSegment>) {
    match geometry {
        Geometry::LineString { coordinates } => collect_line(&coordinates, segments),
        Geometry::MultiLineString { coordinates } => {
            for line in &coordinates {
                collect_line(line, segments);
            }
        }
        Geometry::GeometryCollection { geometries } => {
            for inner in geometries {
                collect_geometry(inner, segments);
            }
        }
        Geometry::Unsupported => {}
    }
}

/// Append the consecutive-point segments of one line. Positions are
/// `[lon, lat, ...]`.
///
/// A short or out-of-range position breaks the line: its neighbours are never
/// joined to each other.
fn collect_line(positions: &[Vec<f64>], segments: &mut Vec<TrailSegment>) {
    let mut previous: Option<GeoPoint> = None;

    for pos in positions {
        let point = match pos.as_slice() {
            [lon, lat, ..] => Some(GeoPoint::new(*lat, *lon)).filter(|p| p.is_valid()),
            _ => None,
        };

        if let (Some(start), Some(end)) = (previous, point) {
            segments.push(TrailSegment::new(start, end));
        }
        previous = point;
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Fetch and merge the named datasets into one reference.
///
/// Never fails: broken datasets are logged and skipped.
pub fn load_trail_reference(source: &dyn TrailSource, names: &[String]) -> TrailReference {
    let mut reference = TrailReference::default();

    for name in names {
        let parsed = source
            .fetch(name)
            .and_then(|data| parse_trail_document(name, &data));

        match parsed {
            Ok(segments) => {
                info!(
                    "[TrailLoader] Loaded {} trail segments from '{}'",
                    segments.len(),
                    name
                );
                reference.segments.extend(segments);
                reference.loaded.push(name.clone());
            }
            Err(e) => {
                warn!("[TrailLoader] Skipping dataset '{}': {}", name, e);
                reference.failed.push(name.clone());
            }
        }
    }

    if reference.is_empty() {
        error!(
            "[TrailLoader] Trail reference is EMPTY (datasets {:?}, failed {:?}); \
             every activity will match with zero distance on trail",
            names, reference.failed
        );
    }

    reference
}

/// A trail source paired with an explicitly owned reference cache.
pub struct TrailLoader {
    source: Arc<dyn TrailSource>,
    cache: Mutex<TrailCache>,
}

impl TrailLoader {
    pub fn new(source: Arc<dyn TrailSource>) -> Self {
        Self::with_cache(source, TrailCache::default())
    }

    pub fn with_cache(source: Arc<dyn TrailSource>, cache: TrailCache) -> Self {
        Self {
            source,
            cache: Mutex::new(cache),
        }
    }

    /// Return the merged reference for `names`, loading it on a cache miss.
    ///
    /// References loaded with failures are not cached, so a later call
    /// retries the broken datasets.
    pub fn reference(&self, names: &[String]) -> Arc<TrailReference> {
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(hit) = cache.get(names) {
                debug!("[TrailLoader] Cache hit for {:?}", names);
                return hit;
            }
        }

        let reference = Arc::new(load_trail_reference(self.source.as_ref(), names));

        if reference.failed.is_empty() {
            if let Ok(mut cache) = self.cache.lock() {
                cache.insert(names, Arc::clone(&reference));
            }
        }
        reference
    }

    /// Drop every cached reference, e.g. after a dataset refresh.
    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    pub fn source(&self) -> &Arc<dyn TrailSource> {
        &self.source
    }
}

// ============================================================================
// Refresh
// ============================================================================

/// Outcome of refreshing one dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshStatus {
    pub dataset: String,
    pub success: bool,
    pub size_bytes: Option<usize>,
    pub segment_count: Option<usize>,
    pub error: Option<String>,
}

/// Copy datasets from an upstream source into a local directory store.
///
/// Each document must parse before it replaces the stored copy. A failing
/// dataset is reported and the others still refresh.
pub fn refresh_datasets(
    upstream: &dyn TrailSource,
    target: &DirectoryTrailSource,
    names: &[String],
) -> Vec<RefreshStatus> {
    let mut results = Vec::with_capacity(names.len());

    for name in names {
        let outcome = upstream.fetch(name).and_then(|data| {
            let segments = parse_trail_document(name, &data)?;
            target.store(name, &data)?;
            Ok((data.len(), segments.len()))
        });

        let status = match outcome {
            Ok((size, count)) => {
                info!(
                    "[TrailRefresh] Updated '{}' ({} bytes, {} segments)",
                    name, size, count
                );
                RefreshStatus {
                    dataset: name.clone(),
                    success: true,
                    size_bytes: Some(size),
                    segment_count: Some(count),
                    error: None,
                }
            }
            Err(e) => {
                warn!("[TrailRefresh] Failed to update '{}': {}", name, e);
                RefreshStatus {
                    dataset: name.clone(),
                    success: false,
                    size_bytes: None,
                    segment_count: None,
                    error: Some(e.to_string()),
                }
            }
        };
        results.push(status);
    }

    results
}
