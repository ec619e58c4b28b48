//! Color extractor (C5): downloads a thumbnail, downsizes it, and
//! picks its dominant color via k-means clustering, wired into the
//! same cache/fetch stack the rest of this crate uses.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use image::imageops::FilterType;
use image::GenericImageView;
use url::Url;

use crate::domain::models::RgbColor;
use crate::infrastructure::cache::{ns, Cache, CacheExt};
use crate::infrastructure::http_client::FetchClient;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const RESIZE_WIDTH: u32 = 100;
const KMEANS_K: usize = 3;
const KMEANS_ITERATIONS: usize = 10;

pub struct ColorExtractor {
    http: Arc<FetchClient>,
    /// §4.5 step 8: configurable TTL, default 7 days, applied to both
    /// successful extractions and the sentinel.
    cache_ttl: Duration,
}

impl ColorExtractor {
    pub fn new(cache_ttl_days: i64) -> Self {
        Self {
            http: Arc::new(
                FetchClient::with_timeout(FETCH_TIMEOUT).expect("failed to build color fetch client"),
            ),
            cache_ttl: Duration::from_secs(cache_ttl_days.max(1) as u64 * 24 * 3600),
        }
    }

    pub async fn extract(&self, cache: &dyn Cache, image_url: &str) -> RgbColor {
        if let Some(cached) = cache
            .get_json::<RgbColor>(ns::THUMBNAIL_COLOR, image_url)
            .await
            .ok()
            .flatten()
        {
            return cached;
        }

        let color = self.compute(image_url).await;
        let _ = cache
            .set_json(ns::THUMBNAIL_COLOR, image_url, &color, self.cache_ttl)
            .await;
        color
    }

    async fn compute(&self, image_url: &str) -> RgbColor {
        if Url::parse(image_url).is_err() {
            return RgbColor::SENTINEL;
        }

        let bytes = match self.http.get(image_url).await {
            Ok(response) => match response.bytes().await {
                Ok(b) => b,
                Err(_) => return RgbColor::SENTINEL,
            },
            Err(_) => return RgbColor::SENTINEL,
        };

        let bytes_vec = bytes.to_vec();
        tokio::task::spawn_blocking(move || dominant_color(&bytes_vec))
            .await
            .unwrap_or(RgbColor::SENTINEL)
    }
}

/// Decodes, resizes, and clusters `bytes` on the calling (blocking)
/// thread. Wrapped in `catch_unwind` so a decoder panic surfaces as the
/// sentinel instead of taking down the worker.
fn dominant_color(bytes: &[u8]) -> RgbColor {
    let result = catch_unwind(AssertUnwindSafe(|| {
        let image = image::load_from_memory(bytes).ok()?;
        let (w, _) = image.dimensions();
        let resized = if w > RESIZE_WIDTH {
            image.resize(RESIZE_WIDTH, u32::MAX, FilterType::Lanczos3)
        } else {
            image
        };
        let rgba = resized.to_rgba8();
        let pixels: Vec<[u8; 4]> = rgba.pixels().map(|p| p.0).collect();

        kmeans_dominant(&pixels, true).or_else(|| kmeans_dominant(&pixels, false))
    }));

    match result {
        Ok(Some(color)) => color,
        Ok(None) => RgbColor::SENTINEL,
        Err(_) => {
            tracing::warn!("panic during color extraction, returning sentinel");
            RgbColor::SENTINEL
        }
    }
}

/// Background-masking drops near-white/near-black/fully-transparent
/// pixels before clustering; these usually come from letterboxing or
/// a white canvas rather than the subject. Returns `None` if nothing
/// survives the mask (caller retries with `mask_background = false`) or
/// if there are no pixels to cluster at all.
fn kmeans_dominant(pixels: &[[u8; 4]], mask_background: bool) -> Option<RgbColor> {
    let candidates: Vec<[u8; 4]> = if mask_background {
        pixels
            .iter()
            .copied()
            .filter(|p| !is_background(*p))
            .collect()
    } else {
        pixels.to_vec()
    };

    if candidates.is_empty() {
        return None;
    }

    let k = KMEANS_K.min(candidates.len());
    let mut centroids: Vec<[f32; 3]> = (0..k)
        .map(|i| {
            let p = candidates[i * candidates.len() / k];
            [p[0] as f32, p[1] as f32, p[2] as f32]
        })
        .collect();

    let mut assignments = vec![0usize; candidates.len()];

    for _ in 0..KMEANS_ITERATIONS {
        for (idx, pixel) in candidates.iter().enumerate() {
            let point = [pixel[0] as f32, pixel[1] as f32, pixel[2] as f32];
            assignments[idx] = nearest_centroid(&point, &centroids);
        }

        let mut sums = vec![[0f64; 3]; k];
        let mut counts = vec![0u64; k];
        for (pixel, &cluster) in candidates.iter().zip(&assignments) {
            sums[cluster][0] += pixel[0] as f64;
            sums[cluster][1] += pixel[1] as f64;
            sums[cluster][2] += pixel[2] as f64;
            counts[cluster] += 1;
        }
        for cluster in 0..k {
            if counts[cluster] > 0 {
                centroids[cluster] = [
                    (sums[cluster][0] / counts[cluster] as f64) as f32,
                    (sums[cluster][1] / counts[cluster] as f64) as f32,
                    (sums[cluster][2] / counts[cluster] as f64) as f32,
                ];
            }
        }
    }

    let mut membership = vec![0u64; k];
    for &cluster in &assignments {
        membership[cluster] += 1;
    }
    let winner = membership
        .iter()
        .enumerate()
        .max_by_key(|(_, count)| **count)
        .map(|(idx, _)| idx)?;

    let centroid = centroids[winner];
    Some(RgbColor {
        r: centroid[0].round().clamp(0.0, 255.0) as u8,
        g: centroid[1].round().clamp(0.0, 255.0) as u8,
        b: centroid[2].round().clamp(0.0, 255.0) as u8,
    })
}

fn nearest_centroid(point: &[f32; 3], centroids: &[[f32; 3]]) -> usize {
    centroids
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            distance_sq(point, a)
                .partial_cmp(&distance_sq(point, b))
                .unwrap()
        })
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

fn distance_sq(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)
}

fn is_background(pixel: [u8; 4]) -> bool {
    if pixel[3] < 10 {
        return true;
    }
    let [r, g, b, _] = pixel;
    (r > 240 && g > 240 && b > 240) || (r < 15 && g < 15 && b < 15)
}
