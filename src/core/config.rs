//! Slicer configuration.

use crate::core::session::MarkerKind;

/// Callee names recognized as marker operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerNames {
    pub begin_slice: String,
    pub end_slice: String,
    pub pack: String,
    pub unpack: String,
    pub region_start: String,
    pub region_end: String,
}

impl Default for MarkerNames {
    fn default() -> Self {
        Self {
            begin_slice: "begin_slice".to_string(),
            end_slice: "end_slice".to_string(),
            pack: "pack".to_string(),
            unpack: "unpack".to_string(),
            region_start: "region_start".to_string(),
            region_end: "region_end".to_string(),
        }
    }
}

impl MarkerNames {
    pub fn name(&self, kind: MarkerKind) -> &str {
        match kind {
            MarkerKind::BeginSlice => &self.begin_slice,
            MarkerKind::EndSlice => &self.end_slice,
            MarkerKind::Pack => &self.pack,
            MarkerKind::Unpack => &self.unpack,
            MarkerKind::RegionStart => &self.region_start,
            MarkerKind::RegionEnd => &self.region_end,
        }
    }

    /// Marker kind for a callee symbol.
    pub fn classify(&self, callee: &str) -> Option<MarkerKind> {
        MarkerKind::ALL.into_iter().find(|&k| self.name(k) == callee)
    }
}

#[derive(Debug, Clone)]
pub struct SlicerConfig {
    pub markers: MarkerNames,
    /// Reject under-sized buffers. Turning this off only downgrades the check
    /// to a warning and is meant for diagnostic dry runs.
    pub enforce_capacity: bool,
    /// Leave `bitsliced` / `sliced.*` tags on rewritten instructions.
    pub keep_tags: bool,
    /// Run the IR verifier on every function after transformation.
    pub verify: bool,
}

impl Default for SlicerConfig {
    fn default() -> Self {
        Self {
            markers: MarkerNames::default(),
            enforce_capacity: true,
            keep_tags: true,
            verify: true,
        }
    }
}
