//! Drives a full comparison run over an image set.

use super::table::ComparisonTable;
use crate::core::traits::{InputProcessor, PreferenceModel};
use crate::core::{ComparisonConfig, PreferenceError};
use crate::predictor::PreferenceContext;
use itertools::Itertools;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Every unordered pair `(a, b)` with `1 <= a < b <= n`, `a` ascending and
/// then `b` ascending within each `a`.
pub fn image_pairs(n: u32) -> impl Iterator<Item = (u32, u32)> {
    (1..=n).tuple_combinations()
}

/// Path of image `index` inside `dir`, named with a two-digit zero-padded index.
pub fn image_path(dir: &Path, index: u32) -> PathBuf {
    dir.join(format!("{index:02}.png"))
}

/// Compares every pair of the configured image set, one forward pass at a time.
///
/// Nothing is written here; the caller persists the returned table once the
/// whole run has succeeded. The first failure aborts the run.
pub fn run_comparisons<M, P>(
    ctx: &PreferenceContext<M, P>,
    config: &ComparisonConfig,
) -> Result<ComparisonTable, PreferenceError>
where
    M: PreferenceModel,
    P: InputProcessor,
{
    config.validate()?;

    let total = config.num_pairs();
    let mut table = ComparisonTable::with_capacity(total);
    let start = Instant::now();
    tracing::info!(
        images = config.num_images,
        pairs = total,
        dir = %config.image_dir.display(),
        "starting pairwise comparisons"
    );

    for (done, (a, b)) in image_pairs(config.num_images).enumerate() {
        let path_a = image_path(&config.image_dir, a);
        let path_b = image_path(&config.image_dir, b);

        let scores = ctx.compare_images(&path_a, &path_b, &config.prompt)?;
        table.push(a, b, scores)?;

        tracing::info!(
            "[{}/{}] ({a:02}, {b:02}) L={:.3} R={:.3} iL={:.3} iR={:.3}",
            done + 1,
            total,
            scores.left(),
            scores.right(),
            scores.inverted_left(),
            scores.inverted_right()
        );
    }

    tracing::info!(
        pairs = table.len(),
        "finished in {:.1}s",
        start.elapsed().as_secs_f64()
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockModel, MockProcessor};
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn write_image_set(dir: &Path, n: u32) {
        for i in 1..=n {
            RgbImage::from_pixel(2, 2, Rgb([i as u8 * 10, 0, 0]))
                .save(image_path(dir, i))
                .unwrap();
        }
    }

    fn config(dir: &Path, n: u32) -> ComparisonConfig {
        ComparisonConfig {
            image_dir: dir.to_path_buf(),
            num_images: n,
            output: dir.join("data.arrow"),
            ..Default::default()
        }
    }

    fn context() -> PreferenceContext<MockModel, MockProcessor> {
        PreferenceContext::new(MockModel::default(), MockProcessor::default(), [" L", " R"])
            .unwrap()
    }

    #[test]
    fn test_image_pairs_order() {
        let pairs: Vec<_> = image_pairs(4).collect();
        assert_eq!(pairs, [(1, 2), (1, 3), (1, 4), (2, 3), (2, 4), (3, 4)]);
        assert_eq!(image_pairs(64).count(), 2016);
        assert!(image_pairs(64).all(|(a, b)| a < b));
    }

    #[test]
    fn test_image_path_is_zero_padded() {
        let dir = Path::new("img");
        assert_eq!(image_path(dir, 1), PathBuf::from("img/01.png"));
        assert_eq!(image_path(dir, 42), PathBuf::from("img/42.png"));
    }

    #[test]
    fn test_three_images_give_three_rows() {
        let dir = TempDir::new().unwrap();
        write_image_set(dir.path(), 3);

        let table = run_comparisons(&context(), &config(dir.path(), 3)).unwrap();
        let keys: Vec<_> = table.rows().iter().map(|r| (r.img_a, r.img_b)).collect();
        assert_eq!(keys, [(1, 2), (1, 3), (2, 3)]);

        // The left image of the first composite is img_a, of the second img_b.
        let row = table.get(1, 3).unwrap();
        assert_eq!(row.left(), MockModel::expected_logit(3, 10.0));
        assert_eq!(row.inverted_left(), MockModel::expected_logit(3, 30.0));
    }

    #[test]
    fn test_missing_image_aborts_run() {
        let dir = TempDir::new().unwrap();
        write_image_set(dir.path(), 2);

        let err = run_comparisons(&context(), &config(dir.path(), 3)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_run_then_persist() {
        let dir = TempDir::new().unwrap();
        write_image_set(dir.path(), 4);
        let cfg = config(dir.path(), 4);

        let table = run_comparisons(&context(), &cfg).unwrap();
        table.write_ipc(&cfg.output).unwrap();

        let loaded = ComparisonTable::read_ipc(&cfg.output).unwrap();
        assert_eq!(loaded, table);
        assert_eq!(loaded.len(), 6);
    }
}
