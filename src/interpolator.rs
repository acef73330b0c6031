use ndarray::ArrayView3;

pub(crate) struct Interpolator;

impl Interpolator {
    /// Per-axis source-over-target ratios for resampling `original_dim`
    /// onto `target_dim`.
    pub(crate) fn scale_factors(
        original_dim: (usize, usize, usize),
        target_dim: (usize, usize, usize),
    ) -> (f32, f32, f32) {
        (
            original_dim.0 as f32 / target_dim.0 as f32,
            original_dim.1 as f32 / target_dim.1 as f32,
            original_dim.2 as f32 / target_dim.2 as f32,
        )
    }

    #[inline]
    pub(crate) fn trilinear_interpolate(volume: &ArrayView3<f32>, x: f32, y: f32, z: f32) -> f32 {
        let (width, height, depth) = volume.dim();

        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let z0 = z.floor() as usize;
        let x1 = (x0 + 1).min(width - 1);
        let y1 = (y0 + 1).min(height - 1);
        let z1 = (z0 + 1).min(depth - 1);

        let dx = x - x0 as f32;
        let dy = y - y0 as f32;
        let dz = z - z0 as f32;
        let one_minus_dx = 1.0 - dx;
        let one_minus_dy = 1.0 - dy;

        let v000 = volume[[x0, y0, z0]];
        let v100 = volume[[x1, y0, z0]];
        let v010 = volume[[x0, y1, z0]];
        let v110 = volume[[x1, y1, z0]];
        let v001 = volume[[x0, y0, z1]];
        let v101 = volume[[x1, y0, z1]];
        let v011 = volume[[x0, y1, z1]];
        let v111 = volume[[x1, y1, z1]];

        // Collapse x, then y, then z.
        let v00 = v000.mul_add(one_minus_dx, v100 * dx);
        let v10 = v010.mul_add(one_minus_dx, v110 * dx);
        let v01 = v001.mul_add(one_minus_dx, v101 * dx);
        let v11 = v011.mul_add(one_minus_dx, v111 * dx);

        let v0 = v00.mul_add(one_minus_dy, v10 * dy);
        let v1 = v01.mul_add(one_minus_dy, v11 * dy);

        v0.mul_add(1.0 - dz, v1 * dz)
    }
}
