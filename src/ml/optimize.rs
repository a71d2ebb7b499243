//! Derivative-free minimisation for the statistical models.

use std::cmp::Ordering;

/// Nelder-Mead settings. Coefficients are the textbook ones.
#[derive(Debug, Clone, Copy)]
pub struct NelderMead {
    pub max_iter: usize,
    pub tolerance: f64,
    pub initial_step: f64,
    pub reflection: f64,
    pub expansion: f64,
    pub contraction: f64,
    pub shrink: f64,
}

impl Default for NelderMead {
    fn default() -> Self {
        Self {
            max_iter: 500,
            tolerance: 1e-8,
            initial_step: 0.05,
            reflection: 1.0,
            expansion: 2.0,
            contraction: 0.5,
            shrink: 0.5,
        }
    }
}

impl NelderMead {
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Minimum {
    pub point: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Minimise `objective` from `start`, clamping every vertex into `bounds`
/// when given. NaN objective values rank as worst.
pub fn minimize<F>(
    objective: F,
    start: &[f64],
    bounds: Option<&[(f64, f64)]>,
    settings: NelderMead,
) -> Minimum
where
    F: Fn(&[f64]) -> f64,
{
    let dim = start.len();
    let clamp = |mut p: Vec<f64>| -> Vec<f64> {
        if let Some(bounds) = bounds {
            for (x, (lo, hi)) in p.iter_mut().zip(bounds) {
                *x = x.clamp(*lo, *hi);
            }
        }
        p
    };
    let eval = |p: &[f64]| -> f64 {
        let v = objective(p);
        if v.is_nan() {
            f64::INFINITY
        } else {
            v
        }
    };

    if dim == 0 {
        return Minimum {
            point: Vec::new(),
            value: eval(start),
            iterations: 0,
            converged: true,
        };
    }

    let mut vertices: Vec<Vec<f64>> = Vec::with_capacity(dim + 1);
    vertices.push(clamp(start.to_vec()));
    for axis in 0..dim {
        let mut v = start.to_vec();
        v[axis] += if v[axis].abs() > 1e-10 {
            settings.initial_step * v[axis].abs()
        } else {
            settings.initial_step
        };
        vertices.push(clamp(v));
    }
    let mut values: Vec<f64> = vertices.iter().map(|v| eval(v)).collect();

    let mut iterations = 0;
    let mut converged = false;
    while iterations < settings.max_iter {
        iterations += 1;

        let mut order: Vec<usize> = (0..=dim).collect();
        order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(Ordering::Equal));
        let (best, second_worst, worst) = (order[0], order[dim - 1], order[dim]);

        let centroid = centroid_without(&vertices, worst);
        let spread = vertices
            .iter()
            .map(|v| distance(v, &centroid))
            .fold(0.0, f64::max);
        if (values[worst] - values[best]).abs() < settings.tolerance || spread < settings.tolerance {
            converged = true;
            break;
        }

        let along = |from: &[f64], coef: f64| -> Vec<f64> {
            clamp(
                centroid
                    .iter()
                    .zip(from)
                    .map(|(c, p)| c + coef * (p - c))
                    .collect(),
            )
        };

        let reflected = along(&vertices[worst], -settings.reflection);
        let reflected_value = eval(&reflected);

        if reflected_value < values[best] {
            let expanded = along(&reflected, settings.expansion);
            let expanded_value = eval(&expanded);
            if expanded_value < reflected_value {
                vertices[worst] = expanded;
                values[worst] = expanded_value;
            } else {
                vertices[worst] = reflected;
                values[worst] = reflected_value;
            }
            continue;
        }
        if reflected_value < values[second_worst] {
            vertices[worst] = reflected;
            values[worst] = reflected_value;
            continue;
        }

        let (contracted, contracted_value) = if reflected_value < values[worst] {
            let c = along(&reflected, settings.contraction);
            let v = eval(&c);
            (c, v)
        } else {
            let c = along(&vertices[worst], settings.contraction);
            let v = eval(&c);
            (c, v)
        };
        if contracted_value < values[worst].min(reflected_value) {
            vertices[worst] = contracted;
            values[worst] = contracted_value;
            continue;
        }

        let anchor = vertices[best].clone();
        for i in (0..=dim).filter(|&i| i != best) {
            let shrunk = anchor
                .iter()
                .zip(&vertices[i])
                .map(|(a, v)| a + settings.shrink * (v - a))
                .collect();
            vertices[i] = clamp(shrunk);
            values[i] = eval(&vertices[i]);
        }
    }

    let best = (0..=dim)
        .min_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(Ordering::Equal))
        .unwrap_or(0);
    Minimum {
        point: vertices[best].clone(),
        value: values[best],
        iterations,
        converged,
    }
}

fn centroid_without(vertices: &[Vec<f64>], skip: usize) -> Vec<f64> {
    let dim = vertices[0].len();
    let mut c = vec![0.0; dim];
    for v in vertices.iter().enumerate().filter(|(i, _)| *i != skip).map(|(_, v)| v) {
        for (acc, x) in c.iter_mut().zip(v) {
            *acc += x;
        }
    }
    let n = (vertices.len() - 1) as f64;
    c.iter_mut().for_each(|x| *x /= n);
    c
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}
