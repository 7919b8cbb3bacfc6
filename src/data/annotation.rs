//! Ground-truth discovery and parsing.

use std::path::{Path, PathBuf};

use geo_types::coord;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};
use crate::geometry::Point;

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

static TOTALTEXT_RECORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^x:\s*\[\[([^\]]*)\]\],\s*y:\s*\[\[([^\]]*)\]\],\s*ornt:\s*\[u?['"]([^'"]*)['"]\],\s*transcriptions:\s*\[u?['"](.*)['"]\]\s*$"#,
    )
    .expect("valid regex")
});

/// One annotated text instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub points: Vec<Point>,
    pub text: String,
    /// Don't-care regions: excluded from supervision.
    pub ignore: bool,
}

impl Annotation {
    pub fn new(points: Vec<Point>, text: impl Into<String>) -> Self {
        let text = text.into();
        let ignore = is_dont_care(&text);
        Self {
            points,
            text,
            ignore,
        }
    }
}

fn is_dont_care(text: &str) -> bool {
    matches!(text.trim(), "#" | "###")
}

/// Lists the images of `img_dir` (sorted) and pairs each one with its ground
/// truth file in `gt_dir`.
pub fn load_metadata(
    img_dir: impl AsRef<Path>,
    gt_dir: impl AsRef<Path>,
) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let img_dir = img_dir.as_ref();
    let gt_dir = gt_dir.as_ref();

    let mut img_paths: Vec<PathBuf> = std::fs::read_dir(img_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    img_paths.sort();

    if img_paths.is_empty() {
        return Err(Error::EmptyDataset(img_dir.to_path_buf()));
    }

    let gt_paths = img_paths
        .iter()
        .map(|img_path| find_gt_file(img_path, gt_dir))
        .collect::<Result<Vec<_>>>()?;

    tracing::info!("{}: {} images", img_dir.display(), img_paths.len());
    Ok((img_paths, gt_paths))
}

fn find_gt_file(img_path: &Path, gt_dir: &Path) -> Result<PathBuf> {
    let stem = img_path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::MissingAnnotation(img_path.to_path_buf()))?;

    [
        format!("poly_gt_{stem}.txt"),
        format!("gt_{stem}.txt"),
        format!("{stem}.txt"),
    ]
    .into_iter()
    .map(|name| gt_dir.join(name))
    .find(|candidate| candidate.is_file())
    .ok_or_else(|| Error::MissingAnnotation(img_path.to_path_buf()))
}

pub fn load_annotations(gt_path: impl AsRef<Path>) -> Result<Vec<Annotation>> {
    let gt_path = gt_path.as_ref();
    let content = std::fs::read_to_string(gt_path)?;
    parse_annotations(&content, gt_path)
}

/// Parses either the Total-Text `x: [[..]], y: [[..]], ...` records (which may
/// wrap over several lines) or `x1,y1,...,xn,yn,text` lines.
pub fn parse_annotations(content: &str, source: &Path) -> Result<Vec<Annotation>> {
    let content = content.trim_start_matches('\u{feff}');
    let mut annotations = Vec::new();

    // (first line number, joined record)
    let mut records: Vec<(usize, String)> = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match records.last_mut() {
            Some((_, record)) if !line.starts_with("x:") && record.starts_with("x:") => {
                record.push(' ');
                record.push_str(line);
            }
            _ => records.push((index + 1, line.to_string())),
        }
    }

    for (line, record) in records {
        let malformed = |reason: String| Error::MalformedAnnotation {
            path: source.to_path_buf(),
            line,
            reason,
        };

        let annotation = if record.starts_with("x:") {
            parse_totaltext_record(&record).map_err(malformed)?
        } else {
            parse_csv_record(&record).map_err(malformed)?
        };
        annotations.push(annotation);
    }

    Ok(annotations)
}

fn parse_numbers(field: &str) -> std::result::Result<Vec<f32>, String> {
    field
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f32>().map_err(|e| format!("bad coordinate {s:?}: {e}")))
        .collect()
}

fn parse_totaltext_record(record: &str) -> std::result::Result<Annotation, String> {
    let caps = TOTALTEXT_RECORD
        .captures(record)
        .ok_or_else(|| "not a Total-Text record".to_string())?;

    let xs = parse_numbers(&caps[1])?;
    let ys = parse_numbers(&caps[2])?;
    if xs.len() != ys.len() {
        return Err(format!("{} x values but {} y values", xs.len(), ys.len()));
    }
    if xs.len() < 3 {
        return Err(format!("polygon needs at least 3 points, got {}", xs.len()));
    }

    let points = xs.iter().zip(&ys).map(|(&x, &y)| coord! { x: x, y: y }).collect();
    let mut annotation = Annotation::new(points, &caps[4]);
    // orientation '#' marks don't-care regions as well
    annotation.ignore |= &caps[3] == "#";
    Ok(annotation)
}

fn parse_csv_record(record: &str) -> std::result::Result<Annotation, String> {
    let fields: Vec<&str> = record.split(',').collect();
    let mut coords: Vec<f32> = fields
        .iter()
        .map_while(|f| f.trim().parse::<f32>().ok())
        .collect();
    let mut text_start = coords.len();
    // an odd count means the transcription itself is numeric
    if coords.len() % 2 == 1 {
        coords.pop();
        text_start -= 1;
    }
    if coords.len() < 6 {
        return Err(format!("polygon needs at least 3 points, got {}", coords.len() / 2));
    }

    let points = coords
        .chunks_exact(2)
        .map(|xy| coord! { x: xy[0], y: xy[1] })
        .collect();
    let text = fields[text_start..].join(",");
    Ok(Annotation::new(points, text.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_totaltext_records() {
        let content = "x: [[115 503 494 115]], y: [[322 346 426 404]], ornt: [u'h'], transcriptions: [u'nauGHTY']\n\
                       x: [[734 1058 1061 744]], y: [[360 369 449 430]], ornt: [u'#'], transcriptions: [u'#']\n";
        let annotations = parse_annotations(content, Path::new("gt.txt")).unwrap();
        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations[0].text, "nauGHTY");
        assert!(!annotations[0].ignore);
        assert_eq!(annotations[0].points[1], coord! { x: 503.0, y: 346.0 });
        assert!(annotations[1].ignore);
    }

    #[test]
    fn test_parse_wrapped_totaltext_record() {
        let content = "x: [[10 20 30 40 50\n 60]], y: [[1 2 3 4 5\n 6]], ornt: [u'c'], transcriptions: [u'curved']\n";
        let annotations = parse_annotations(content, Path::new("gt.txt")).unwrap();
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].points.len(), 6);
    }

    #[test]
    fn test_parse_csv_records() {
        let content = "10,10,50,10,50,30,10,30,hello, world\n1,1,9,1,9,5,1,5,###\n0,0,4,0,4,4,2019\n";
        let annotations = parse_annotations(content, Path::new("gt.txt")).unwrap();
        assert_eq!(annotations[0].text, "hello, world");
        assert_eq!(annotations[0].points.len(), 4);
        assert!(annotations[1].ignore);
        assert_eq!(annotations[2].points.len(), 3);
        assert_eq!(annotations[2].text, "2019");
    }

    #[test]
    fn test_mismatched_coordinates_are_rejected() {
        let content = "x: [[1 2 3]], y: [[1 2]], ornt: [u'h'], transcriptions: [u'a']";
        let err = parse_annotations(content, Path::new("bad.txt")).unwrap_err();
        assert!(matches!(err, Error::MalformedAnnotation { line: 1, .. }));
    }
}
