//! In-process resampling of NIfTI volumes onto a fixed grid shape.

use std::path::{Path, PathBuf};

use ndarray::{Array3, Axis, Ix3, Zip};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};

use crate::error::PipelineError;
use crate::interpolator::Interpolator;

/// Resample the volume at `input` onto `target_shape` voxels and write it
/// to `output`, adjusting the affine so the image stays in the same
/// physical position.
///
/// Sampling is trilinear with voxel centers aligned between the two
/// grids; samples outside the source grid clamp to the boundary.
pub fn resample_to_shape(
    input: &Path,
    output: &Path,
    target_shape: [usize; 3],
) -> Result<PathBuf, PipelineError> {
    if target_shape.contains(&0) {
        return Err(PipelineError::InvalidVolume(format!(
            "target shape {target_shape:?} has an empty axis"
        )));
    }

    let object = ReaderOptions::new().read_file(input)?;
    let mut header = object.header().clone();
    let mut data = object.into_volume().into_ndarray::<f32>()?;

    // Tolerate trailing singleton axes (e.g. a 4-D file with one frame).
    while data.ndim() > 3 && data.shape()[data.ndim() - 1] == 1 {
        let last = data.ndim() - 1;
        data = data.index_axis_move(Axis(last), 0);
    }
    let data = data.into_dimensionality::<Ix3>().map_err(|_| {
        PipelineError::InvalidVolume(format!(
            "{} is not a 3-D volume",
            input.display()
        ))
    })?;
    let source_dim = data.dim();
    if source_dim.0 == 0 || source_dim.1 == 0 || source_dim.2 == 0 {
        return Err(PipelineError::InvalidVolume(format!(
            "{} contains no voxels",
            input.display()
        )));
    }

    let scale = Interpolator::scale_factors(
        source_dim,
        (target_shape[0], target_shape[1], target_shape[2]),
    );
    let max = (
        (source_dim.0 - 1) as f32,
        (source_dim.1 - 1) as f32,
        (source_dim.2 - 1) as f32,
    );

    let mut resampled = Array3::<f32>::zeros((target_shape[0], target_shape[1], target_shape[2]));
    let view = data.view();
    Zip::indexed(&mut resampled).par_for_each(|(x, y, z), value| {
        let src_x = ((x as f32 + 0.5) * scale.0 - 0.5).max(0.0).min(max.0);
        let src_y = ((y as f32 + 0.5) * scale.1 - 0.5).max(0.0).min(max.1);
        let src_z = ((z as f32 + 0.5) * scale.2 - 0.5).max(0.0).min(max.2);
        *value = Interpolator::trilinear_interpolate(&view, src_x, src_y, src_z);
    });

    // Fold the grid change into the affine: scale each voxel axis and
    // shift the origin by the half-voxel offset between the two grids.
    let affine = header.affine::<f64>();
    let mut resampled_affine = affine;
    let source_shape = [source_dim.0, source_dim.1, source_dim.2];
    for axis in 0..3 {
        let s = source_shape[axis] as f64 / target_shape[axis] as f64;
        let shift = (s - 1.0) / 2.0;
        for row in 0..3 {
            resampled_affine[(row, axis)] = affine[(row, axis)] * s;
            resampled_affine[(row, 3)] += affine[(row, axis)] * shift;
        }
    }
    header.set_affine(&resampled_affine);

    WriterOptions::new(output)
        .reference_header(&header)
        .write_nifti(&resampled)?;
    Ok(output.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_volume(path: &Path, volume: &Array3<f32>) {
        WriterOptions::new(path).write_nifti(volume).unwrap();
    }

    fn read_volume(path: &Path) -> Array3<f32> {
        ReaderOptions::new()
            .read_file(path)
            .unwrap()
            .into_volume()
            .into_ndarray::<f32>()
            .unwrap()
            .into_dimensionality::<Ix3>()
            .unwrap()
    }

    #[test]
    fn resampling_changes_the_grid_shape() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in.nii.gz");
        let output = tmp.path().join("out.nii.gz");
        let gradient = Array3::from_shape_fn((8, 8, 4), |(x, _, _)| x as f32);
        write_volume(&input, &gradient);

        resample_to_shape(&input, &output, [16, 16, 8]).unwrap();

        let result = read_volume(&output);
        assert_eq!(result.dim(), (16, 16, 8));
        // The gradient along x survives the upsampling.
        assert!(result[[0, 8, 4]] < result[[8, 8, 4]]);
        assert!(result[[8, 8, 4]] < result[[15, 8, 4]]);

        // Doubling the grid halves each voxel axis of the affine.
        let before = ReaderOptions::new()
            .read_file(&input)
            .unwrap()
            .header()
            .affine::<f64>();
        let after = ReaderOptions::new()
            .read_file(&output)
            .unwrap()
            .header()
            .affine::<f64>();
        for axis in 0..3 {
            for row in 0..3 {
                assert!((after[(row, axis)] - before[(row, axis)] * 0.5).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn identity_resample_preserves_values() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in.nii.gz");
        let output = tmp.path().join("out.nii.gz");
        let volume = Array3::from_shape_fn((4, 5, 6), |(x, y, z)| (x + 2 * y + 3 * z) as f32);
        write_volume(&input, &volume);

        resample_to_shape(&input, &output, [4, 5, 6]).unwrap();

        let result = read_volume(&output);
        for (a, b) in volume.iter().zip(result.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn a_single_frame_four_dimensional_file_is_squeezed() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in.nii.gz");
        let output = tmp.path().join("out.nii.gz");
        let volume = ndarray::Array4::from_shape_fn((4, 4, 4, 1), |(x, _, _, _)| x as f32);
        WriterOptions::new(&input).write_nifti(&volume).unwrap();

        resample_to_shape(&input, &output, [8, 8, 8]).unwrap();
        assert_eq!(read_volume(&output).dim(), (8, 8, 8));
    }

    #[test]
    fn rejects_volumes_that_are_not_three_dimensional() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("flat.nii.gz");
        let output = tmp.path().join("out.nii.gz");
        let flat = ndarray::Array2::<f32>::zeros((8, 8));
        WriterOptions::new(&input).write_nifti(&flat).unwrap();

        let result = resample_to_shape(&input, &output, [4, 4, 4]);
        assert!(matches!(result, Err(PipelineError::InvalidVolume(_))));
    }

    #[test]
    fn rejects_an_empty_target_shape() {
        let result = resample_to_shape(Path::new("in.nii.gz"), Path::new("out.nii.gz"), [0, 4, 4]);
        assert!(matches!(result, Err(PipelineError::InvalidVolume(_))));
    }
}
