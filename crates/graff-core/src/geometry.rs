//! Internal coordinates and their Cartesian gradients.
//!
//! All geometry is done in `f64` on the host; the results feed the tensor
//! pipeline as constants. Each function returns the internal coordinate
//! together with its analytic gradient with respect to the Cartesian
//! positions of the participating atoms, so the classical evaluator can
//! assemble forces by the chain rule without differentiating through the
//! geometry itself.
//!
//! Gradient formulas:
//! - bond: `dr/dx_i = (x_i - x_j) / r`
//! - angle: the standard expression in terms of the unit arms and `sin θ`,
//!   with the central-atom gradient fixed by translation invariance
//! - dihedral: the Blondel-Karplus formulation, which stays finite for all
//!   non-degenerate configurations

/// Minimal 3-vector helper. Kept private to this module; the public surface
/// works on `[f64; 3]` arrays.
#[derive(Debug, Clone, Copy)]
struct Vec3 {
    x: f64,
    y: f64,
    z: f64,
}

impl Vec3 {
    fn from(a: [f64; 3]) -> Self {
        Self {
            x: a[0],
            y: a[1],
            z: a[2],
        }
    }

    fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    fn sub(self, o: Self) -> Self {
        Self {
            x: self.x - o.x,
            y: self.y - o.y,
            z: self.z - o.z,
        }
    }

    fn add(self, o: Self) -> Self {
        Self {
            x: self.x + o.x,
            y: self.y + o.y,
            z: self.z + o.z,
        }
    }

    fn scale(self, s: f64) -> Self {
        Self {
            x: self.x * s,
            y: self.y * s,
            z: self.z * s,
        }
    }

    fn neg(self) -> Self {
        self.scale(-1.0)
    }

    fn dot(self, o: Self) -> f64 {
        self.x * o.x + self.y * o.y + self.z * o.z
    }

    fn cross(self, o: Self) -> Self {
        Self {
            x: self.y * o.z - self.z * o.y,
            y: self.z * o.x - self.x * o.z,
            z: self.x * o.y - self.y * o.x,
        }
    }

    fn norm(self) -> f64 {
        self.dot(self).sqrt()
    }
}

/// Bond length `r = |x_i - x_j|` and its gradients `(d r / d x_i, d r / d x_j)`.
pub fn bond_length_with_grad(xi: [f64; 3], xj: [f64; 3]) -> (f64, [[f64; 3]; 2]) {
    let d = Vec3::from(xi).sub(Vec3::from(xj));
    let r = d.norm();
    let gi = d.scale(1.0 / r);
    (r, [gi.to_array(), gi.neg().to_array()])
}

/// Angle `θ` at the central atom `x_j`, in radians, with gradients for
/// `(x_i, x_j, x_k)`.
pub fn angle_with_grad(xi: [f64; 3], xj: [f64; 3], xk: [f64; 3]) -> (f64, [[f64; 3]; 3]) {
    let u = Vec3::from(xi).sub(Vec3::from(xj));
    let v = Vec3::from(xk).sub(Vec3::from(xj));
    let nu = u.norm();
    let nv = v.norm();
    let uh = u.scale(1.0 / nu);
    let vh = v.scale(1.0 / nv);
    let c = uh.dot(vh).clamp(-1.0, 1.0);
    let theta = c.acos();
    let s = (1.0 - c * c).sqrt().max(1e-12);

    let gi = uh.scale(c).sub(vh).scale(1.0 / (nu * s));
    let gk = vh.scale(c).sub(uh).scale(1.0 / (nv * s));
    let gj = gi.add(gk).neg();
    (theta, [gi.to_array(), gj.to_array(), gk.to_array()])
}

/// Dihedral `φ` of the chain `x_i - x_j - x_k - x_l`, in `(-π, π]`, with
/// gradients for all four atoms.
pub fn dihedral_with_grad(
    xi: [f64; 3],
    xj: [f64; 3],
    xk: [f64; 3],
    xl: [f64; 3],
) -> (f64, [[f64; 3]; 4]) {
    let b1 = Vec3::from(xj).sub(Vec3::from(xi));
    let b2 = Vec3::from(xk).sub(Vec3::from(xj));
    let b3 = Vec3::from(xl).sub(Vec3::from(xk));

    let n1 = b1.cross(b2);
    let n2 = b2.cross(b3);
    let nb2 = b2.norm();

    let phi = (n1.cross(n2).dot(b2.scale(1.0 / nb2))).atan2(n1.dot(n2));

    let n1sq = n1.dot(n1);
    let n2sq = n2.dot(n2);
    let gi = n1.scale(-nb2 / n1sq);
    let gl = n2.scale(nb2 / n2sq);
    let b1b2 = b1.dot(b2) / (nb2 * nb2);
    let b3b2 = b3.dot(b2) / (nb2 * nb2);
    let gj = gi.scale(b1b2 - 1.0).sub(gl.scale(b3b2));
    let gk = gl.scale(b3b2 - 1.0).sub(gi.scale(b1b2));

    (
        phi,
        [gi.to_array(), gj.to_array(), gk.to_array(), gl.to_array()],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: f64 = 1e-6;
    const TOL: f64 = 1e-5;

    fn numerical_grad<const N: usize>(
        f: impl Fn(&[[f64; 3]; N]) -> f64,
        xs: &[[f64; 3]; N],
    ) -> [[f64; 3]; N] {
        let mut grads = [[0.0; 3]; N];
        for a in 0..N {
            for d in 0..3 {
                let mut plus = *xs;
                let mut minus = *xs;
                plus[a][d] += H;
                minus[a][d] -= H;
                grads[a][d] = (f(&plus) - f(&minus)) / (2.0 * H);
            }
        }
        grads
    }

    fn assert_grads_close<const N: usize>(analytic: [[f64; 3]; N], numeric: [[f64; 3]; N]) {
        for a in 0..N {
            for d in 0..3 {
                assert!(
                    (analytic[a][d] - numeric[a][d]).abs() < TOL,
                    "atom {a} dim {d}: analytic {} vs numeric {}",
                    analytic[a][d],
                    numeric[a][d]
                );
            }
        }
    }

    #[test]
    fn bond_length_value_and_grad() {
        let xs = [[0.3, -0.2, 0.9], [1.4, 0.7, -0.1]];
        let (r, grads) = bond_length_with_grad(xs[0], xs[1]);
        let expected = ((1.1f64).powi(2) + (0.9f64).powi(2) + (1.0f64).powi(2)).sqrt();
        assert!((r - expected).abs() < 1e-12);
        let numeric = numerical_grad(|x| bond_length_with_grad(x[0], x[1]).0, &xs);
        assert_grads_close(grads, numeric);
    }

    #[test]
    fn angle_value_and_grad() {
        // right angle at the origin
        let (theta, _) = angle_with_grad([1.0, 0.0, 0.0], [0.0, 0.0, 0.0], [0.0, 1.0, 0.0]);
        assert!((theta - std::f64::consts::FRAC_PI_2).abs() < 1e-12);

        let xs = [[1.1, 0.2, -0.3], [0.1, -0.1, 0.2], [-0.4, 1.0, 0.5]];
        let (_, grads) = angle_with_grad(xs[0], xs[1], xs[2]);
        let numeric = numerical_grad(|x| angle_with_grad(x[0], x[1], x[2]).0, &xs);
        assert_grads_close(grads, numeric);
    }

    #[test]
    fn angle_grads_sum_to_zero() {
        let (_, grads) = angle_with_grad([1.2, 0.1, 0.0], [0.0, 0.0, 0.3], [-0.5, 0.9, -0.2]);
        for d in 0..3 {
            let sum: f64 = grads.iter().map(|g| g[d]).sum();
            assert!(sum.abs() < 1e-12);
        }
    }

    #[test]
    fn dihedral_value_and_grad() {
        // trans-planar chain has φ = ±π
        let (phi, _) = dihedral_with_grad(
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, -1.0, 0.0],
        );
        assert!((phi.abs() - std::f64::consts::PI).abs() < 1e-12);

        let xs = [
            [0.1, 1.0, 0.2],
            [0.0, 0.0, 0.0],
            [1.2, 0.1, -0.1],
            [1.5, -0.9, 0.8],
        ];
        let (_, grads) = dihedral_with_grad(xs[0], xs[1], xs[2], xs[3]);
        let numeric = numerical_grad(|x| dihedral_with_grad(x[0], x[1], x[2], x[3]).0, &xs);
        assert_grads_close(grads, numeric);
    }

    #[test]
    fn dihedral_grads_sum_to_zero() {
        let (_, grads) = dihedral_with_grad(
            [0.3, 0.9, 0.1],
            [0.0, 0.1, -0.2],
            [1.1, 0.0, 0.0],
            [1.4, -1.0, 0.6],
        );
        for d in 0..3 {
            let sum: f64 = grads.iter().map(|g| g[d]).sum();
            assert!(sum.abs() < 1e-10);
        }
    }

    #[test]
    fn dihedral_sign_flips_under_chain_reversal() {
        let xs = [
            [0.1, 1.0, 0.2],
            [0.0, 0.0, 0.0],
            [1.2, 0.1, -0.1],
            [1.5, -0.9, 0.8],
        ];
        let (phi, _) = dihedral_with_grad(xs[0], xs[1], xs[2], xs[3]);
        let (rev, _) = dihedral_with_grad(xs[3], xs[2], xs[1], xs[0]);
        assert!((phi + rev).abs() < 1e-12);
    }
}
