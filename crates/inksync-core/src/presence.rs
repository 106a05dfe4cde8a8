//! Presence: who is connected and where their cursor is.
//!
//! Each user is the only writer of their own [`PresenceRecord`]; peers keep
//! read-only copies. Outbound cursor updates are throttled and dropped (not
//! queued) inside the interval. Presence never touches the document.

use crate::canvas::RenderScheduler;
use crate::element::SerializableColor;
use crate::version::now_millis;
use kurbo::Point;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Tool name used before the host reports one.
pub const DEFAULT_TOOL: &str = "select";

/// The local user, as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            avatar_url: None,
        }
    }
}

/// Per-user presence, also the presence wire payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// `#rrggbb`, derived from `user_id`.
    pub color: String,
    pub tool: String,
    /// Cursor in document coordinates.
    pub x: f64,
    pub y: f64,
    /// Unix milliseconds of the owner's last update.
    pub updated_at: u64,
}

impl PresenceRecord {
    /// Fresh record for `identity` with the cursor at the origin.
    pub fn for_identity(identity: &Identity) -> Self {
        Self {
            user_id: identity.user_id.clone(),
            display_name: identity.display_name.clone(),
            avatar_url: identity.avatar_url.clone(),
            color: color_for_user(&identity.user_id),
            tool: DEFAULT_TOOL.to_string(),
            x: 0.0,
            y: 0.0,
            updated_at: now_millis(),
        }
    }

    pub fn cursor(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Stable cursor color for a user id, as `#rrggbb`.
///
/// FNV-1a over the id picks the hue; saturation and lightness are fixed so
/// every color reads well on a light canvas.
pub fn color_for_user(user_id: &str) -> String {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in user_id.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    let hue = (hash % 360) as f64 / 360.0;
    let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.5);
    SerializableColor::new(
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8,
        255,
    )
    .to_hex()
}

fn hsl_to_rgb(h: f64, s: f64, l: f64) -> (f64, f64, f64) {
    if s == 0.0 {
        return (l, l, l);
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f64, q: f64, mut t: f64) -> f64 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

/// Tracks the local presence record and cached copies of every peer's.
pub struct PresenceTracker {
    local: PresenceRecord,
    peers: HashMap<String, PresenceRecord>,
    throttle: Duration,
    last_sent: Option<Instant>,
}

impl PresenceTracker {
    /// Create a tracker for `identity`, throttling cursor sends to `throttle`.
    pub fn new(identity: &Identity, throttle: Duration) -> Self {
        Self {
            local: PresenceRecord::for_identity(identity),
            peers: HashMap::new(),
            throttle,
            last_sent: None,
        }
    }

    /// The local user's own record.
    pub fn local(&self) -> &PresenceRecord {
        &self.local
    }

    /// Record a local cursor/tool change.
    ///
    /// Returns the payload to broadcast, or None when the previous send was
    /// less than the throttle interval ago.
    pub fn track(&mut self, cursor: Point, tool: &str, now: Instant) -> Option<PresenceRecord> {
        if let Some(last) = self.last_sent {
            if now.saturating_duration_since(last) < self.throttle {
                return None;
            }
        }
        self.local.x = cursor.x;
        self.local.y = cursor.y;
        if self.local.tool != tool {
            self.local.tool = tool.to_string();
        }
        self.local.updated_at = now_millis();
        self.last_sent = Some(now);
        Some(self.local.clone())
    }

    /// Payload announcing the local record regardless of throttling, e.g. on
    /// channel join.
    pub fn announce(&mut self, now: Instant) -> PresenceRecord {
        self.local.updated_at = now_millis();
        self.last_sent = Some(now);
        self.local.clone()
    }

    /// Replace the peer map with the channel's full presence state.
    pub fn on_sync(&mut self, records: Vec<PresenceRecord>, render: &mut RenderScheduler) {
        self.peers.clear();
        for record in records {
            if record.user_id != self.local.user_id {
                self.peers.insert(record.user_id.clone(), record);
            }
        }
        render.request();
    }

    /// A peer joined the channel.
    pub fn on_join(&mut self, record: PresenceRecord, render: &mut RenderScheduler) {
        if record.user_id == self.local.user_id {
            return;
        }
        log::debug!("Presence: {} joined", record.user_id);
        self.peers.insert(record.user_id.clone(), record);
        render.request();
    }

    /// A peer moved its cursor or switched tools. Out-of-date records are
    /// ignored.
    pub fn on_update(&mut self, record: PresenceRecord, render: &mut RenderScheduler) {
        if record.user_id == self.local.user_id {
            return;
        }
        if let Some(existing) = self.peers.get(&record.user_id) {
            if record.updated_at < existing.updated_at {
                return;
            }
        }
        self.peers.insert(record.user_id.clone(), record);
        render.request();
    }

    /// A peer left. Returns true if it was known.
    pub fn on_leave(&mut self, user_id: &str, render: &mut RenderScheduler) -> bool {
        let removed = self.peers.remove(user_id).is_some();
        if removed {
            log::debug!("Presence: {} left", user_id);
        }
        // Repaint even for unknown peers so a stale cursor can't linger.
        render.request();
        removed
    }

    /// Forget every peer, e.g. after the channel dropped.
    pub fn clear_peers(&mut self, render: &mut RenderScheduler) {
        if !self.peers.is_empty() {
            self.peers.clear();
            render.request();
        }
    }

    pub fn get(&self, user_id: &str) -> Option<&PresenceRecord> {
        self.peers.get(user_id)
    }

    /// Peer records sorted by user id.
    pub fn snapshot(&self) -> Vec<PresenceRecord> {
        let mut records: Vec<PresenceRecord> = self.peers.values().cloned().collect();
        records.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        records
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THROTTLE: Duration = Duration::from_millis(33);

    fn tracker() -> PresenceTracker {
        PresenceTracker::new(&Identity::new("me", "Me"), THROTTLE)
    }

    fn peer(id: &str, updated_at: u64) -> PresenceRecord {
        let mut record = PresenceRecord::for_identity(&Identity::new(id, id.to_uppercase()));
        record.updated_at = updated_at;
        record
    }

    #[test]
    fn test_color_is_deterministic() {
        assert_eq!(color_for_user("alice"), color_for_user("alice"));
        assert_ne!(color_for_user("alice"), color_for_user("bob"));
        let color = color_for_user("alice");
        assert_eq!(color.len(), 7);
        assert!(color.starts_with('#'));
    }

    #[test]
    fn test_track_throttles_and_drops() {
        let mut t = tracker();
        let start = Instant::now();

        assert!(t.track(Point::new(1.0, 1.0), "select", start).is_some());
        assert!(t.track(Point::new(2.0, 2.0), "select", start + Duration::from_millis(10)).is_none());
        assert!(t.track(Point::new(3.0, 3.0), "select", start + Duration::from_millis(32)).is_none());

        let sent = t
            .track(Point::new(4.0, 4.0), "pen", start + Duration::from_millis(33))
            .expect("interval elapsed");
        assert_eq!(sent.cursor(), Point::new(4.0, 4.0));
        assert_eq!(sent.tool, "pen");
    }

    #[test]
    fn test_payload_wire_shape() {
        let mut t = tracker();
        let payload = t.announce(Instant::now());
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["userId"], "me");
        assert_eq!(json["displayName"], "Me");
        assert!(json.get("avatarUrl").is_none());
        assert!(json.get("updatedAt").is_some());
        assert_eq!(json["tool"], DEFAULT_TOOL);
    }

    #[test]
    fn test_leave_prunes_and_renders() {
        let mut t = tracker();
        let mut render = RenderScheduler::default();
        t.on_join(peer("u", 1), &mut render);
        assert!(render.take());

        assert!(t.on_leave("u", &mut render));
        assert!(t.snapshot().iter().all(|r| r.user_id != "u"));
        assert!(render.take());
    }

    #[test]
    fn test_sync_replaces_and_skips_self() {
        let mut t = tracker();
        let mut render = RenderScheduler::default();
        t.on_join(peer("old", 1), &mut render);

        t.on_sync(vec![peer("a", 1), peer("me", 1), peer("b", 1)], &mut render);
        let ids: Vec<String> = t.snapshot().into_iter().map(|r| r.user_id).collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_update_ignores_older_records() {
        let mut t = tracker();
        let mut render = RenderScheduler::default();
        let mut newer = peer("u", 200);
        newer.x = 50.0;
        t.on_update(newer, &mut render);
        t.on_update(peer("u", 100), &mut render);
        assert_eq!(t.get("u").unwrap().x, 50.0);
    }
}
