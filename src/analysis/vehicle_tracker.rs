// src/analysis/vehicle_tracker.rs
//
// Centroid tracker for the intersection camera.
// Keeps a persistent identity per vehicle across frames and assigns
// each track to the approach whose zone contains its centroid.
//
// Design:
//   - Greedy nearest-centroid matching (sufficient for <50 objects per frame)
//   - Distances measured in tracker pixels, zones in normalized coordinates
//   - Tracks coast through detection gaps until the staleness limit
//   - Direction recomputed every frame; crossing a zone boundary migrates
//     the track, it is not an error
//   - Identities are monotonic and never handed out twice

use crate::types::{Detection, Direction, DirectionCounts, FrameGeometry, ObjectClass, Zone};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Tracker-space frame size; normalized centroids are scaled by this
    pub frame_width: f32,
    pub frame_height: f32,
    /// Maximum centroid distance (tracker pixels) to continue a track
    pub max_match_distance: f32,
    /// Consecutive unmatched frames a track survives before deregistration
    pub max_stale_frames: u32,
    /// Minimum detection confidence to accept
    pub min_confidence: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            frame_width: 640.0,
            frame_height: 480.0,
            max_match_distance: 50.0,
            max_stale_frames: 30, // ~1-2s at 15-30fps
            min_confidence: 0.3,
        }
    }
}

// ============================================================================
// TYPES
// ============================================================================

/// A single tracked vehicle
#[derive(Debug, Clone)]
pub struct Track {
    pub id: u64,
    /// Normalized centroid of the last matched detection
    pub centroid: (f32, f32),
    pub class: ObjectClass,
    pub direction: Option<Direction>,
    pub first_seen_frame: u64,
    pub last_seen_frame: u64,
    pub last_seen_ms: f64,
    pub frames_since_seen: u32,
    pub hits: u32,
    pub last_confidence: f32,
}

impl Track {
    fn new(id: u64, det: &Detection, timestamp_ms: f64, frame_id: u64) -> Self {
        Self {
            id,
            centroid: det.bbox.center(),
            class: det.class,
            direction: None,
            first_seen_frame: frame_id,
            last_seen_frame: frame_id,
            last_seen_ms: timestamp_ms,
            frames_since_seen: 0,
            hits: 1,
            last_confidence: det.confidence,
        }
    }

    fn update_with_detection(&mut self, det: &Detection, timestamp_ms: f64, frame_id: u64) {
        self.centroid = det.bbox.center();
        self.class = det.class;
        self.last_seen_frame = frame_id;
        self.last_seen_ms = timestamp_ms;
        self.frames_since_seen = 0;
        self.hits += 1;
        self.last_confidence = det.confidence;
    }

    fn mark_missed(&mut self) {
        self.frames_since_seen += 1;
    }
}

/// Complete per-direction counts produced by one finished tracker update.
/// Published whole so readers never observe a half-applied frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CountSnapshot {
    pub counts: DirectionCounts,
    pub frame_id: u64,
    pub timestamp_ms: f64,
    pub active_tracks: usize,
}

impl CountSnapshot {
    pub fn empty() -> Self {
        Self {
            counts: DirectionCounts::filled(0),
            frame_id: 0,
            timestamp_ms: 0.0,
            active_tracks: 0,
        }
    }
}

// ============================================================================
// MAIN TRACKER
// ============================================================================

pub struct VehicleTracker {
    pub config: TrackerConfig,
    zones: Vec<Zone>,
    tracks: Vec<Track>,
    next_id: u64,
}

impl VehicleTracker {
    pub fn new(config: TrackerConfig, zones: Vec<Zone>) -> Self {
        Self {
            config,
            zones,
            tracks: Vec::with_capacity(64),
            next_id: 1,
        }
    }

    /// Process one frame of detections and return the resulting counts.
    pub fn update(
        &mut self,
        detections: &[Detection],
        timestamp_ms: f64,
        frame_id: u64,
    ) -> CountSnapshot {
        // Countable vehicles with sane, in-frame boxes only
        let valid: Vec<Detection> = detections
            .iter()
            .filter(|d| {
                d.class.is_countable_vehicle() && d.confidence >= self.config.min_confidence
            })
            .filter_map(|d| {
                d.bbox
                    .sanitized(FrameGeometry::UNIT)
                    .map(|bbox| Detection { bbox, ..*d })
            })
            .collect();

        // ────────────────────────────────────────────────────────────────
        // GREEDY CENTROID MATCHING
        // All pairs within range, nearest first; ties resolve by index so
        // the same input always yields the same assignment.
        // ────────────────────────────────────────────────────────────────
        let mut matched_tracks = vec![false; self.tracks.len()];
        let mut matched_dets = vec![false; valid.len()];

        let max_dist = self.config.max_match_distance;
        let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, det) in valid.iter().enumerate() {
                let dist = self.pixel_distance(track.centroid, det.bbox.center());
                if dist <= max_dist {
                    pairs.push((ti, di, dist));
                }
            }
        }
        pairs.sort_by(|a, b| {
            a.2.partial_cmp(&b.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
                .then(a.1.cmp(&b.1))
        });

        for (ti, di, _dist) in &pairs {
            if matched_tracks[*ti] || matched_dets[*di] {
                continue;
            }
            matched_tracks[*ti] = true;
            matched_dets[*di] = true;
            self.tracks[*ti].update_with_detection(&valid[*di], timestamp_ms, frame_id);
        }

        // Unmatched tracks coast
        for (ti, matched) in matched_tracks.iter().enumerate() {
            if !matched {
                self.tracks[ti].mark_missed();
            }
        }

        // Unmatched detections become new tracks
        for (di, matched) in matched_dets.iter().enumerate() {
            if !matched {
                let track = Track::new(self.next_id, &valid[di], timestamp_ms, frame_id);
                debug!(
                    "🆕 Track T{} registered: class={:?}, centroid=({:.3},{:.3})",
                    track.id, track.class, track.centroid.0, track.centroid.1
                );
                self.next_id += 1;
                self.tracks.push(track);
            }
        }

        // Deregister stale tracks
        let max_stale = self.config.max_stale_frames;
        self.tracks.retain(|t| {
            if t.frames_since_seen > max_stale {
                debug!(
                    "🗑️  Track T{} deregistered (unseen for {} frames)",
                    t.id, t.frames_since_seen
                );
                return false;
            }
            true
        });

        // Zone assignment, every frame
        for i in 0..self.tracks.len() {
            let (cx, cy) = self.tracks[i].centroid;
            let zone = self.zone_for(cx, cy);
            let track = &mut self.tracks[i];
            if track.direction != zone && track.direction.is_some() {
                info!(
                    "↪️  Track T{} migrated {:?} → {:?}",
                    track.id, track.direction, zone
                );
            }
            track.direction = zone;
        }

        self.snapshot(timestamp_ms, frame_id)
    }

    fn pixel_distance(&self, a: (f32, f32), b: (f32, f32)) -> f32 {
        let dx = (a.0 - b.0) * self.config.frame_width;
        let dy = (a.1 - b.1) * self.config.frame_height;
        (dx * dx + dy * dy).sqrt()
    }

    /// First configured zone containing the centroid
    fn zone_for(&self, x: f32, y: f32) -> Option<Direction> {
        self.zones
            .iter()
            .find(|z| z.contains(x, y))
            .map(|z| z.direction)
    }

    fn snapshot(&self, timestamp_ms: f64, frame_id: u64) -> CountSnapshot {
        let mut counts = DirectionCounts::filled(0);
        for track in &self.tracks {
            if let Some(dir) = track.direction {
                counts[dir] += 1;
            }
        }
        CountSnapshot {
            counts,
            frame_id,
            timestamp_ms,
            active_tracks: self.tracks.len(),
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn get_track(&self, id: u64) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    /// Identities handed out so far
    pub fn total_tracks_created(&self) -> u64 {
        self.next_id - 1
    }

    /// Drop every track. Identities keep counting up.
    pub fn reset(&mut self) {
        self.tracks.clear();
    }
}

// ============================================================================
// TESTS
// ============================================================================
