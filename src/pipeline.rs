//! Dataset pipeline.
//! For each item: pick a background and a position, build the render request, render the
//! board, composite it and write the three artifacts. Items are independent: each one draws
//! from its own RNG stream derived from `(seed, index)`, so results do not depend on how
//! many items run at once. Per-item failures are logged and counted, never fatal.

use std::sync::Arc;

use futures::StreamExt;
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use rand_xoshiro::SplitMix64;
use tracing::{info, warn};

use crate::annotate::{AnnotationWriter, item_name};
use crate::composite::composite;
use crate::config::Config;
use crate::corpus::{BackgroundCorpus, PositionCorpus, load_background};
use crate::error::Result;
use crate::renderer::BoardRenderer;
use crate::request::RequestBuilder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub index: u32,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub requested: u32,
    pub succeeded: u32,
    pub failures: Vec<ItemFailure>,
}

impl RunSummary {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// 0 when every item was written, 2 for a partial run, 1 when nothing was produced.
    pub fn exit_code(&self) -> u8 {
        if self.failures.is_empty() {
            0
        } else if self.succeeded > 0 {
            2
        } else {
            1
        }
    }
}

/// Independent RNG for item `index`. The seed is mixed before the index so neighbouring
/// seeds do not share item streams.
pub fn item_rng(seed: u64, index: u32) -> SmallRng {
    let base = SplitMix64::seed_from_u64(seed).next_u64();
    let mut mixer = SplitMix64::seed_from_u64(base ^ u64::from(index));
    SmallRng::seed_from_u64(mixer.next_u64())
}

pub struct Pipeline<R> {
    positions: PositionCorpus,
    backgrounds: Arc<BackgroundCorpus>,
    builder: RequestBuilder,
    renderer: R,
    writer: Arc<AnnotationWriter>,
    seed: u64,
}

impl<R: BoardRenderer> Pipeline<R> {
    /// Loads both corpora and prepares the output dirs. Any problem here aborts the run
    /// before the renderer is called.
    pub fn from_config(config: &Config, renderer: R) -> Result<Self> {
        let positions = PositionCorpus::load(&config.positions, config.validate_positions)?;
        let backgrounds = BackgroundCorpus::scan(&config.backgrounds)?;
        let writer = AnnotationWriter::create(
            &config.image_output_dir,
            &config.bbox_output_dir,
            &config.metadata_output_dir,
        )?;
        let seed = config.seed.unwrap_or_else(rand::random);
        info!(
            seed,
            positions = positions.len(),
            backgrounds = backgrounds.len(),
            "pipeline ready"
        );

        Ok(Self {
            positions,
            backgrounds: Arc::new(backgrounds),
            builder: RequestBuilder::from_config(config),
            renderer,
            writer: Arc::new(writer),
            seed,
        })
    }

    /// Generates items `0..num` with up to `jobs` in flight.
    pub async fn run(&self, num: u32, jobs: usize, progress_every: u32) -> RunSummary {
        let mut summary = RunSummary {
            requested: num,
            ..RunSummary::default()
        };

        let mut items = futures::stream::iter(0..num)
            .map(|index| async move { (index, self.generate(index).await) })
            .buffer_unordered(jobs.max(1));

        let mut done = 0u32;
        while let Some((index, result)) = items.next().await {
            done += 1;
            match result {
                Ok(()) => summary.succeeded += 1,
                Err(e) => {
                    warn!(index, error = %e, "skipping item");
                    summary.failures.push(ItemFailure {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
            if progress_every > 0 && done % progress_every == 0 {
                info!(done, total = num, succeeded = summary.succeeded, failed = summary.failed(), "progress");
            }
        }

        summary.failures.sort_by_key(|f| f.index);
        summary
    }

    /// Produces the complete artifact triple for item `index`, or nothing.
    pub async fn generate(&self, index: u32) -> Result<()> {
        let mut rng = item_rng(self.seed, index);
        let background_path = self.backgrounds.sample(&mut rng).to_path_buf();
        let position = self.positions.sample(&mut rng);
        let request = self.builder.build(position, &mut rng);

        let board = self.renderer.render(&request).await?;

        let writer = Arc::clone(&self.writer);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let background = load_background(&background_path)?;
            let (image, bbox) = composite(background, &board, &mut rng)?;
            writer.write(&image, &bbox, &request, &item_name(index))?;
            Ok(())
        })
        .await?
    }
}

/// Logs the end-of-run report.
pub fn report(summary: &RunSummary) {
    info!(
        requested = summary.requested,
        succeeded = summary.succeeded,
        failed = summary.failed(),
        "dataset generation finished"
    );
    for failure in &summary.failures {
        warn!(index = failure.index, reason = %failure.reason, "item not generated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Position;
    use crate::error::{Error, RenderError};
    use crate::request::{ColorTheme, RenderRequest};
    use crate::testutil::scratch_dir;
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FENS: [&str; 3] = [
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1",
        "8/8/8/4k3/8/8/8/4K3 w - - 0 1",
    ];

    /// Returns a fixed board; fails on the listed call numbers (0-based).
    struct StubRenderer {
        calls: AtomicUsize,
        fail_on: Vec<usize>,
    }

    impl StubRenderer {
        fn new(fail_on: Vec<usize>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on,
            }
        }
    }

    impl BoardRenderer for StubRenderer {
        async fn render(&self, request: &RenderRequest) -> std::result::Result<DynamicImage, RenderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.contains(&call) {
                return Err(RenderError::Status {
                    status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                    body: "renderer crashed".into(),
                });
            }
            Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                request.size,
                request.size,
                Rgba([181, 136, 99, 255]),
            )))
        }
    }

    fn fixture(name: &str) -> Config {
        let root = scratch_dir(name);
        let backgrounds = root.join("backgrounds");
        std::fs::create_dir_all(&backgrounds).unwrap();
        RgbaImage::from_pixel(80, 60, Rgba([0, 90, 0, 255]))
            .save(backgrounds.join("grass.png"))
            .unwrap();
        RgbaImage::from_pixel(50, 120, Rgba([90, 0, 0, 255]))
            .save(backgrounds.join("brick.png"))
            .unwrap();

        let entries: Vec<Position> = FENS
            .iter()
            .map(|fen| Position {
                board_encoding: fen.to_string(),
                last_move: None,
                check_square: None,
            })
            .collect();
        let positions = root.join("fens.json");
        std::fs::write(&positions, serde_json::to_string(&entries).unwrap()).unwrap();

        Config {
            positions,
            backgrounds,
            image_output_dir: root.join("out/images"),
            bbox_output_dir: root.join("out/bounding_boxes"),
            metadata_output_dir: root.join("out/metadata"),
            board_size: 32,
            color_theme: ColorTheme::Wikipedia,
            seed: Some(1234),
            ..Config::default()
        }
    }

    fn read_bbox(path: &Path) -> Vec<u32> {
        std::fs::read_to_string(path)
            .unwrap()
            .split(',')
            .map(|v| v.parse().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_failed_render_skips_only_that_item() {
        let config = fixture("pipeline_partial");
        let pipeline = Pipeline::from_config(&config, StubRenderer::new(vec![7])).unwrap();

        let summary = pipeline.run(10, 1, 0).await;

        assert_eq!(summary.requested, 10);
        assert_eq!(summary.succeeded, 9);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.failures[0].index, 7);
        assert!(summary.failures[0].reason.contains("500"), "{}", summary.failures[0].reason);
        assert_eq!(summary.exit_code(), 2);

        for index in 0..10u32 {
            let name = item_name(index);
            let paths = [
                config.image_output_dir.join(format!("{name}.png")),
                config.bbox_output_dir.join(format!("{name}.txt")),
                config.metadata_output_dir.join(format!("{name}.txt")),
            ];
            for path in &paths {
                assert_eq!(path.exists(), index != 7, "{}", path.display());
            }
        }
    }

    #[tokio::test]
    async fn test_artifacts_match_sampled_position_and_background() {
        let config = fixture("pipeline_correspondence");
        let pipeline = Pipeline::from_config(&config, StubRenderer::new(Vec::new())).unwrap();
        let summary = pipeline.run(12, 1, 5).await;
        assert_eq!(summary.exit_code(), 0);

        let positions = PositionCorpus::load(&config.positions, true).unwrap();
        let backgrounds = BackgroundCorpus::scan(&config.backgrounds).unwrap();
        for index in 0..12u32 {
            // Replay the item's stream to recover what it sampled.
            let mut rng = item_rng(1234, index);
            let background = image::open(backgrounds.sample(&mut rng)).unwrap();
            let expected = positions.sample(&mut rng);

            let name = item_name(index);
            let meta: RenderRequest = serde_json::from_str(
                &std::fs::read_to_string(config.metadata_output_dir.join(format!("{name}.txt"))).unwrap(),
            )
            .unwrap();
            assert_eq!(meta.board_encoding, expected.board_encoding);
            assert_eq!(meta.size, 32);

            let composite = image::open(config.image_output_dir.join(format!("{name}.png"))).unwrap();
            assert_eq!(
                (composite.width(), composite.height()),
                (background.width(), background.height())
            );

            let b = read_bbox(&config.bbox_output_dir.join(format!("{name}.txt")));
            let (w, h) = (background.width(), background.height());
            assert!(b[0] < b[2] && b[2] <= w && b[1] < b[3] && b[3] <= h, "{b:?} in {w}x{h}");
            assert_eq!(b[2] - b[0], b[3] - b[1]);
            let side = b[2] - b[0];
            assert!(side >= w.min(h) / 4 && side < w.min(h));
        }
    }

    #[tokio::test]
    async fn test_output_independent_of_job_count() {
        let sequential = fixture("pipeline_jobs_1");
        let parallel = fixture("pipeline_jobs_4");

        Pipeline::from_config(&sequential, StubRenderer::new(Vec::new()))
            .unwrap()
            .run(8, 1, 0)
            .await;
        Pipeline::from_config(&parallel, StubRenderer::new(Vec::new()))
            .unwrap()
            .run(8, 4, 0)
            .await;

        for index in 0..8u32 {
            let name = format!("{}.txt", item_name(index));
            assert_eq!(
                read_bbox(&sequential.bbox_output_dir.join(&name)),
                read_bbox(&parallel.bbox_output_dir.join(&name))
            );
            assert_eq!(
                std::fs::read_to_string(sequential.metadata_output_dir.join(&name)).unwrap(),
                std::fs::read_to_string(parallel.metadata_output_dir.join(&name)).unwrap()
            );
        }
    }

    #[tokio::test]
    async fn test_empty_position_corpus_aborts_before_rendering() {
        let config = fixture("pipeline_empty");
        std::fs::write(&config.positions, "[]").unwrap();

        let renderer = StubRenderer::new(Vec::new());
        let result = Pipeline::from_config(&config, renderer);
        assert!(matches!(result, Err(Error::CorpusEmpty("position"))));
        assert!(!config.image_output_dir.exists());
    }

    #[test]
    fn test_item_rng_streams_differ() {
        let a = item_rng(5, 0).next_u64();
        let b = item_rng(5, 1).next_u64();
        assert_ne!(a, b);
        assert_eq!(a, item_rng(5, 0).next_u64());
        // Neighbouring seeds must not replay each other's items shifted by one.
        assert_ne!(item_rng(5, 1).next_u64(), item_rng(6, 0).next_u64());
    }

    #[test]
    fn test_exit_codes() {
        let mut summary = RunSummary {
            requested: 2,
            succeeded: 2,
            failures: Vec::new(),
        };
        assert_eq!(summary.exit_code(), 0);
        summary.succeeded = 0;
        summary.failures = vec![
            ItemFailure { index: 0, reason: "x".into() },
            ItemFailure { index: 1, reason: "y".into() },
        ];
        assert_eq!(summary.exit_code(), 1);
    }
}
