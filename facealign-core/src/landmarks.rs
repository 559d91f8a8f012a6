use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LandmarkError {
    #[error("Failed to read landmark file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse landmark JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("Landmark file contains no points")]
    Empty,
}

/// Accepted JSON shapes for a single point
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonPoint {
    Pair([f32; 2]),
    Named { x: f32, y: f32 },
}

impl From<JsonPoint> for (f32, f32) {
    fn from(point: JsonPoint) -> Self {
        match point {
            JsonPoint::Pair([x, y]) => (x, y),
            JsonPoint::Named { x, y } => (x, y),
        }
    }
}

/// Load detector output from disk.
///
/// `.json` files hold an array of `[x, y]` pairs or `{"x": .., "y": ..}`
/// objects; anything else is read as text with one `x y` (or `x,y`) pair per line.
pub fn load_landmarks<P: AsRef<Path>>(path: P) -> Result<Vec<(f32, f32)>, LandmarkError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let landmarks = if is_json {
        parse_json(&contents)?
    } else {
        parse_text(&contents)?
    };

    log::debug!("Loaded {} landmarks from {}", landmarks.len(), path.display());
    Ok(landmarks)
}

pub fn parse_json(contents: &str) -> Result<Vec<(f32, f32)>, LandmarkError> {
    let points: Vec<JsonPoint> = serde_json::from_str(contents)?;
    if points.is_empty() {
        return Err(LandmarkError::Empty);
    }
    Ok(points.into_iter().map(Into::into).collect())
}

pub fn parse_text(contents: &str) -> Result<Vec<(f32, f32)>, LandmarkError> {
    let mut landmarks = Vec::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|field| !field.is_empty())
            .collect();
        if fields.len() != 2 {
            return Err(LandmarkError::Parse {
                line: idx + 1,
                reason: format!("expected 2 coordinates, found {}", fields.len()),
            });
        }

        let parse = |field: &str| {
            field.parse::<f32>().map_err(|e| LandmarkError::Parse {
                line: idx + 1,
                reason: format!("invalid coordinate {:?}: {}", field, e),
            })
        };
        landmarks.push((parse(fields[0])?, parse(fields[1])?));
    }

    if landmarks.is_empty() {
        return Err(LandmarkError::Empty);
    }
    Ok(landmarks)
}
