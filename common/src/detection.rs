use serde::{Deserialize, Serialize};

/// Box corners. Normalized to `[0, 1]` of the frame when the detector ran
/// with `percentage = true`, pixel-space otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }
}

/// One scored bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub score: f32,
    pub label: String,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

impl DetectionResult {
    /// Caption drawn above the box, e.g. `person 87.5%`.
    pub fn caption(&self) -> String {
        format!("{} {:.1}%", self.label, self.score * 100.0)
    }
}

/// Ordered results of one inference run. Replaced wholesale, never merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectionSet(Vec<DetectionResult>);

impl DetectionSet {
    pub fn new(results: Vec<DetectionResult>) -> Self {
        Self(results)
    }

    /// Keep results scoring at least `threshold`, preserving order.
    pub fn above_threshold(results: Vec<DetectionResult>, threshold: f32) -> Self {
        Self(results.into_iter().filter(|r| r.score >= threshold).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DetectionResult> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a DetectionSet {
    type Item = &'a DetectionResult;
    type IntoIter = std::slice::Iter<'a, DetectionResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(label: &str, score: f32) -> DetectionResult {
        DetectionResult {
            score,
            label: label.into(),
            bbox: BoundingBox {
                xmin: 0.1,
                ymin: 0.2,
                xmax: 0.5,
                ymax: 0.6,
            },
        }
    }

    #[test]
    fn threshold_keeps_order() {
        let set = DetectionSet::above_threshold(
            vec![result("a", 0.9), result("b", 0.4), result("c", 0.6)],
            0.5,
        );
        let scores: Vec<f32> = set.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![0.9, 0.6]);
    }

    #[test]
    fn threshold_is_inclusive() {
        let set = DetectionSet::above_threshold(vec![result("edge", 0.5)], 0.5);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn caption_formats_percent() {
        assert_eq!(result("person", 0.875).caption(), "person 87.5%");
    }

    #[test]
    fn box_field_uses_wire_name() {
        let json = serde_json::to_value(result("cat", 0.75)).unwrap();
        assert!(json.get("box").is_some());
        assert!(json.get("bbox").is_none());
    }
}
