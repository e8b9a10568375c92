//! Media path resolution.
//!
//! Media paths are never stored with the message; they are recomputed from the
//! talker hash, the message time and, on generation 4, a content hash from the
//! side channel. Every probe is best effort: a missing directory or file yields
//! `None`. Returned paths are relative to the data directory and use `/`.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Local};

use crate::models::Platform;
use crate::schema::talker_hash;

/// Suffixes tried for temp-directory images, highest priority first
const TEMP_IMAGE_SUFFIXES: [&str; 3] = ["_.pic.jpg", "_.pic_hd.jpg", "_.pic_thumb.jpg"];

/// Resolved image location
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImagePaths {
    /// Full image
    pub image: Option<String>,
    /// Thumbnail
    pub thumb: Option<String>,
}

/// Resolved video location
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoPaths {
    /// Video file
    pub video: Option<String>,
    /// Poster thumbnail
    pub thumb: Option<String>,
}

/// Suffix the v4 client appends to cached image names
#[must_use]
pub const fn platform_suffix(platform: Platform) -> &'static str {
    match platform {
        Platform::Windows => "_W",
        Platform::Darwin => "_M",
    }
}

/// Drop the first path component (the account directory) and normalize separators
#[must_use]
pub fn strip_first_component(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    match normalized.split_once('/') {
        Some((_, rest)) if !rest.is_empty() => rest.to_string(),
        _ => normalized,
    }
}

/// Sorted file names of a directory; empty when it cannot be read
fn file_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();
    names
}

/// First file in `dir` whose name ends with one of `suffixes`, honoring suffix order
fn find_by_suffix(dir: &Path, suffixes: &[String]) -> Option<String> {
    let names = file_names(dir);
    suffixes
        .iter()
        .find_map(|suffix| names.iter().find(|name| name.ends_with(suffix.as_str())).cloned())
}

/// Image cached in `Message/MessageTemp/<md5(talker)>/Image`, named after the send time
#[must_use]
pub fn temp_image(data_dir: &Path, talker: &str, time_secs: i64) -> Option<String> {
    let hash = talker_hash(talker);
    let dir = data_dir.join("Message").join("MessageTemp").join(&hash).join("Image");
    let suffixes: Vec<String> = TEMP_IMAGE_SUFFIXES
        .iter()
        .map(|sfx| format!("{time_secs}{sfx}"))
        .collect();
    find_by_suffix(&dir, &suffixes).map(|name| format!("Message/MessageTemp/{hash}/Image/{name}"))
}

/// Video cached in `Message/MessageTemp/<md5(talker)>/Video`
#[must_use]
pub fn temp_video(data_dir: &Path, talker: &str, time_secs: i64) -> Option<String> {
    let hash = talker_hash(talker);
    let dir = data_dir.join("Message").join("MessageTemp").join(&hash).join("Video");
    find_by_suffix(&dir, &[format!("{time_secs}.mp4")])
        .map(|name| format!("Message/MessageTemp/{hash}/Video/{name}"))
}

fn exists(data_dir: Option<&Path>, rel: &str) -> bool {
    data_dir.is_some_and(|root| root.join(rel).is_file())
}

/// v4 image under `msg/attach/<md5(talker)>/<YYYY-MM>/Img/`.
///
/// With a data directory the first existing candidate wins; without one the
/// canonical name is returned unprobed.
#[must_use]
pub fn v4_image(
    data_dir: Option<&Path>,
    talker: &str,
    time: &DateTime<Local>,
    md5: &str,
    platform: Platform,
) -> ImagePaths {
    let sfx = platform_suffix(platform);
    let dir = format!("msg/attach/{}/{}/Img", talker_hash(talker), time.format("%Y-%m"));
    let candidates = [
        format!("{dir}/{md5}{sfx}.dat"),
        format!("{dir}/{md5}.dat"),
        format!("{dir}/{md5}_h{sfx}.dat"),
    ];
    let thumb = format!("{dir}/{md5}_t{sfx}.dat");

    match data_dir {
        None => ImagePaths {
            image: candidates.into_iter().next(),
            thumb: Some(thumb),
        },
        Some(_) => ImagePaths {
            image: candidates.into_iter().find(|c| exists(data_dir, c)),
            thumb: exists(data_dir, &thumb).then_some(thumb),
        },
    }
}

/// v4 video under `msg/video/<YYYY-MM>/`
#[must_use]
pub fn v4_video(data_dir: Option<&Path>, time: &DateTime<Local>, md5: &str) -> VideoPaths {
    let dir = format!("msg/video/{}", time.format("%Y-%m"));
    let video = format!("{dir}/{md5}.mp4");
    let thumb = format!("{dir}/{md5}_thumb.jpg");

    match data_dir {
        None => VideoPaths {
            video: Some(video),
            thumb: Some(thumb),
        },
        Some(_) => VideoPaths {
            video: exists(data_dir, &video).then_some(video),
            thumb: exists(data_dir, &thumb).then_some(thumb),
        },
    }
}
