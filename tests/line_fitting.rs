use approx::assert_relative_eq;
use calibration_optim::{differentiate_numerically, LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{DMatrix, DVector, Matrix2, Vector2};
use pcg_rand::Pcg64;
use rand::distributions::{Distribution, Uniform};
use rand::Rng;

type F = f64;

const LINES_TO_ESTIMATE: usize = 200;

/// The line `$\vec{n}\cdot\vec{p} = c$` with `$\vec{n} = (\cos\theta, \sin\theta)$`.
#[derive(Debug, Clone)]
struct Line {
    normal_angle: F,
    c: F,
}

impl Line {
    /// Vector from the projection of `point` onto the line to the point.
    fn xy_residuals(&self, point: Vector2<F>) -> Vector2<F> {
        let normal = self.normal();
        (normal.dot(&point) - self.c) * normal
    }

    /// Jacobian of [`xy_residuals`] with respect to `(angle, c)`.
    #[rustfmt::skip]
    fn jacobian(&self, point: Vector2<F>) -> Matrix2<F> {
        let n = self.normal();
        let nd = Vector2::new(-self.normal_angle.sin(), self.normal_angle.cos());
        let dist_d_angle = n * point.dot(&nd) + (n.dot(&point) - self.c) * nd;
        Matrix2::new(
            dist_d_angle[0], -n[0],
            dist_d_angle[1], -n[1],
        )
    }

    fn into_vec(self) -> DVector<F> {
        DVector::from_vec(vec![self.normal_angle, self.c])
    }

    fn from_vec(v: &DVector<F>) -> Self {
        Self {
            normal_angle: v[0],
            c: v[1],
        }
    }

    fn norm_cosine_distance(&self, other: &Self) -> F {
        1.0 - self.normal().dot(&other.normal()).abs()
    }

    fn normal(&self) -> Vector2<F> {
        Vector2::new(self.normal_angle.cos(), self.normal_angle.sin())
    }
}

struct LineFittingOptimizationProblem<'a> {
    points: &'a [Vector2<F>],
    model: Line,
}

impl LeastSquaresProblem<F> for LineFittingOptimizationProblem<'_> {
    fn set_params(&mut self, p: &DVector<F>) {
        self.model = Line::from_vec(p);
    }

    fn params(&self) -> DVector<F> {
        self.model.clone().into_vec()
    }

    fn residuals(&self) -> Option<DVector<F>> {
        let residual_data: Vec<F> = self
            .points
            .iter()
            .flat_map(|&point| {
                let vec = self.model.xy_residuals(point);
                vec![vec.x, vec.y]
            })
            .collect();
        Some(DVector::from_vec(residual_data))
    }

    fn jacobian(&self) -> Option<DMatrix<F>> {
        let mut jacobian = DMatrix::zeros(self.points.len() * 2, 2);
        for (i, point) in self.points.iter().enumerate() {
            jacobian
                .view_range_mut(2 * i..2 * (i + 1), ..)
                .copy_from(&self.model.jacobian(*point));
        }
        Some(jacobian)
    }
}

fn random_line(rng: &mut Pcg64) -> (Line, Vec<Vector2<F>>) {
    let normal_angle: F = rng.gen_range(-3.0..3.0);
    let c = rng.gen_range(-10.0..10.0);
    let line = Line { normal_angle, c };
    let normal = line.normal();
    let ray = Vector2::new(normal.y, -normal.x);

    let num = rng.gen_range(100..500);
    // the points scatter evenly up to 5.0 off the line
    let residuals = Uniform::new(-5.0, 5.0);
    let distances = Uniform::new(-50.0, 50.0);
    let points = (0..num)
        .map(|_| {
            let residual: F = residuals.sample(rng);
            let distance: F = distances.sample(rng);
            ray * distance + (c + residual) * normal
        })
        .collect();
    (line, points)
}

#[test]
fn jacobian_matches_numeric() {
    let mut rng = Pcg64::new_unseeded();
    let (line, points) = random_line(&mut rng);
    let mut problem = LineFittingOptimizationProblem {
        points: &points,
        model: line.clone(),
    };
    let x = line.into_vec();
    let numeric = differentiate_numerically(&mut problem, &x).unwrap();
    let analytic = problem.jacobian().unwrap();
    assert_relative_eq!(numeric, analytic, epsilon = 1e-5);
}

#[test]
fn lines() {
    let mut rng = Pcg64::new_unseeded();
    let perturbation = Uniform::new(-0.3, 0.3);
    let mut would_have_failed = false;
    for _ in 0..LINES_TO_ESTIMATE {
        let (real_model, points) = random_line(&mut rng);
        let guess = Line {
            normal_angle: real_model.normal_angle + perturbation.sample(&mut rng),
            c: real_model.c + 10.0 * perturbation.sample(&mut rng),
        };
        would_have_failed = would_have_failed || guess.norm_cosine_distance(&real_model) >= 0.01;

        let problem = LineFittingOptimizationProblem {
            model: guess,
            points: &points,
        };
        let (problem, report) = LevenbergMarquardt::new().minimize(problem);
        assert!(report.termination.was_successful(), "{:?}", report);

        // Check the slope using the cosine distance.
        let new_cosine_distance = problem.model.norm_cosine_distance(&real_model);
        assert!(new_cosine_distance < 0.001, "slope out of expected range");
    }
    // test that there were initial guesses that wouldn't have been enough
    assert!(would_have_failed);
}

#[test]
fn lines_with_forward_differences() {
    let mut rng = Pcg64::new_unseeded();
    for _ in 0..20 {
        let (real_model, points) = random_line(&mut rng);
        let problem = LineFittingOptimizationProblem {
            model: Line {
                normal_angle: real_model.normal_angle + 0.2,
                c: real_model.c - 1.0,
            },
            points: &points,
        };
        let (problem, report) = LevenbergMarquardt::minpack().minimize(problem);
        assert!(report.termination.was_successful(), "{:?}", report);
        assert!(problem.model.norm_cosine_distance(&real_model) < 0.001);
    }
}
