use emath::{Vec2, vec2};

use super::quadtree::{Quadtree, ROOT};

/// Unit direction from `b` to `a` and their distance, clamped to `min_distance`.
///
/// Coincident bodies get a golden-angle direction derived from their indices.
/// Swapping `index_a` and `index_b` flips it, so pairwise forces stay opposite.
pub(super) fn separation(
    point_a: Vec2,
    point_b: Vec2,
    index_a: usize,
    index_b: usize,
    min_distance: f32,
) -> (Vec2, f32) {
    let delta = point_a - point_b;
    let distance = delta.length();
    let direction = if distance > 0.0001 {
        delta / distance
    } else {
        let (low, high) = if index_a < index_b {
            (index_a, index_b)
        } else {
            (index_b, index_a)
        };
        let angle = ((low as f32) * 0.618_034 + (high as f32) * 0.414_214) * std::f32::consts::TAU;
        let direction = vec2(angle.cos(), angle.sin());
        if index_a < index_b { direction } else { -direction }
    };
    (direction, distance.max(min_distance))
}

pub(super) fn accumulate_repulsion_pairs(
    positions: &[Vec2],
    repulsion_strength: f32,
    min_distance: f32,
    forces: &mut [Vec2],
) {
    for i in 0..positions.len() {
        for j in (i + 1)..positions.len() {
            let (direction, distance) = separation(positions[i], positions[j], i, j, min_distance);
            let push = direction * (repulsion_strength / (distance * distance));
            forces[i] += push;
            forces[j] -= push;
        }
    }
}

/// Approximate repulsion for every body from one quadtree walk per body.
///
/// A cell that does not contain the body and looks smaller than `theta` from
/// it acts as a single body of its mass at its mass centre. Leaves are summed
/// exactly with the same `separation` as the all-pairs path.
pub(super) fn accumulate_repulsion_quadtree(
    tree: &Quadtree,
    positions: &[Vec2],
    repulsion_strength: f32,
    min_distance: f32,
    theta: f32,
    forces: &mut [Vec2],
) {
    let mut open = Vec::new();
    for (index, force) in forces.iter_mut().enumerate() {
        let point = positions[index];
        open.clear();
        open.push(ROOT);

        while let Some(cell_index) = open.pop() {
            let cell = tree.cell(cell_index);
            if cell.is_leaf() {
                for &other in tree.bodies(cell) {
                    if other == index {
                        continue;
                    }
                    let (direction, distance) =
                        separation(point, positions[other], index, other, min_distance);
                    *force += direction * (repulsion_strength / (distance * distance));
                }
                continue;
            }

            let delta = point - cell.mass_center;
            let distance = delta.length().max(min_distance);
            if !cell.square.contains(point) && cell.square.side() < theta * distance {
                *force += delta / distance
                    * (repulsion_strength * cell.mass() / (distance * distance));
            } else {
                open.extend(cell.children());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coincident_points_get_opposite_unit_directions() {
        let point = vec2(3.0, 3.0);
        let (forward, distance) = separation(point, point, 2, 5, 1.0);
        let (backward, _) = separation(point, point, 5, 2, 1.0);

        assert_eq!(distance, 1.0);
        assert!((forward.length() - 1.0).abs() < 1e-5);
        assert_eq!(forward, -backward);
    }

    #[test]
    fn pairwise_repulsion_is_symmetric() {
        let positions = [vec2(0.0, 0.0), vec2(10.0, 0.0), vec2(0.0, 10.0)];
        let mut forces = [Vec2::ZERO; 3];
        accumulate_repulsion_pairs(&positions, 100.0, 1.0, &mut forces);

        let net = forces.iter().fold(Vec2::ZERO, |sum, force| sum + *force);
        assert!(net.length() < 1e-4);
        assert!(forces[1].x > 0.0);
        assert!(forces[2].y > 0.0);
    }

    #[test]
    fn quadtree_matches_exact_sum_for_distant_cluster() {
        let mut positions = vec![vec2(0.0, 0.0)];
        for index in 0..30 {
            let offset = index as f32;
            positions.push(vec2(
                1000.0 + (offset % 6.0) * 3.0,
                1000.0 + (offset / 6.0).floor() * 3.0,
            ));
        }

        let mut exact = vec![Vec2::ZERO; positions.len()];
        accumulate_repulsion_pairs(&positions, 5000.0, 1.0, &mut exact);

        let tree = Quadtree::build(&positions).unwrap();
        let mut approximate = vec![Vec2::ZERO; positions.len()];
        accumulate_repulsion_quadtree(&tree, &positions, 5000.0, 1.0, 0.72, &mut approximate);

        let error = (approximate[0] - exact[0]).length() / exact[0].length();
        assert!(error < 0.05, "relative error {error}");
    }

    #[test]
    fn zero_theta_opens_every_cell() {
        let positions = (0..50)
            .map(|index| vec2((index % 8) as f32 * 13.0, (index / 8) as f32 * 9.0))
            .collect::<Vec<_>>();

        let mut exact = vec![Vec2::ZERO; positions.len()];
        accumulate_repulsion_pairs(&positions, 800.0, 1.0, &mut exact);

        let tree = Quadtree::build(&positions).unwrap();
        let mut walked = vec![Vec2::ZERO; positions.len()];
        accumulate_repulsion_quadtree(&tree, &positions, 800.0, 1.0, 0.0, &mut walked);

        for (exact, walked) in exact.iter().zip(&walked) {
            assert!((*exact - *walked).length() <= 1e-3 * exact.length().max(1.0));
        }
    }
}
