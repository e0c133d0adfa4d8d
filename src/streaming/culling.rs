//! Bounding-volume hierarchy over tiles for per-frame visibility
//!
//! Interior boxes are the union of their children, so a plane that fully
//! contains a node also contains every descendant. [`Frustum::overlap`]
//! clears such planes from the clip mask and the recursion never tests them
//! again below that node.

use crate::math::{Aabb, ClipMask, Frustum, Ray};

use super::tile::TileId;

/// Node of the culling tree.
#[derive(Clone, Debug)]
pub enum CullingNode {
    Interior { bounds: Aabb, children: Vec<CullingNode> },
    Leaf { bounds: Aabb, tile: TileId },
}

impl CullingNode {
    /// Build a tree over `tiles` by splitting at the median tile center
    /// along the longest axis. Returns `None` for an empty set.
    pub fn build(tiles: &[(TileId, Aabb)]) -> Option<CullingNode> {
        let mut items = tiles.to_vec();
        if items.is_empty() {
            return None;
        }
        Some(Self::build_range(&mut items))
    }

    fn build_range(items: &mut [(TileId, Aabb)]) -> CullingNode {
        if let [(tile, bounds)] = items {
            return CullingNode::Leaf { bounds: *bounds, tile: *tile };
        }

        let mut centers = Aabb::EMPTY;
        for (_, bounds) in items.iter() {
            centers.add_point(bounds.center());
        }
        let extent = centers.size();
        let axis = if extent.x >= extent.y && extent.x >= extent.z {
            0
        } else if extent.y >= extent.z {
            1
        } else {
            2
        };
        items.sort_by(|a, b| a.1.center()[axis].total_cmp(&b.1.center()[axis]));

        let mid = items.len() / 2;
        let (left, right) = items.split_at_mut(mid);
        let children = vec![Self::build_range(left), Self::build_range(right)];
        let bounds = children[0].bounds().merged(children[1].bounds());
        CullingNode::Interior { bounds, children }
    }

    pub fn bounds(&self) -> &Aabb {
        match self {
            CullingNode::Interior { bounds, .. } | CullingNode::Leaf { bounds, .. } => bounds,
        }
    }

    /// Number of tiles below this node.
    pub fn tile_count(&self) -> usize {
        match self {
            CullingNode::Interior { children, .. } => children.iter().map(|c| c.tile_count()).sum(),
            CullingNode::Leaf { .. } => 1,
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            CullingNode::Interior { children, .. } => {
                1 + children.iter().map(|c| c.depth()).max().unwrap_or(0)
            }
            CullingNode::Leaf { .. } => 1,
        }
    }

    /// Visit every tile below this node.
    pub fn for_each_tile(&self, f: &mut impl FnMut(TileId)) {
        match self {
            CullingNode::Interior { children, .. } => {
                for child in children {
                    child.for_each_tile(&mut *f);
                }
            }
            CullingNode::Leaf { tile, .. } => f(*tile),
        }
    }

    /// Classify every tile as visible or not. `visit` is called exactly once
    /// per tile. Returns the number of nodes tested against the frustum.
    pub fn compute_visible(
        &self,
        clip_mask: ClipMask,
        frustum: &Frustum,
        visit: &mut impl FnMut(TileId, bool),
    ) -> usize {
        match frustum.overlap(clip_mask, self.bounds()) {
            None => {
                self.for_each_tile(&mut |tile| visit(tile, false));
                1
            }
            Some(mask) => match self {
                CullingNode::Interior { children, .. } => {
                    let mut tested = 1;
                    for child in children {
                        tested += child.compute_visible(mask, frustum, &mut *visit);
                    }
                    tested
                }
                CullingNode::Leaf { tile, .. } => {
                    visit(*tile, true);
                    1
                }
            },
        }
    }

    /// Tiles whose bounds the ray passes through, skipping subtrees it
    /// misses.
    pub fn tiles_along_ray(&self, ray: &Ray, out: &mut Vec<TileId>) {
        if ray.intersects_aabb(self.bounds()).is_none() {
            return;
        }
        match self {
            CullingNode::Interior { children, .. } => {
                for child in children {
                    child.tiles_along_ray(ray, out);
                }
            }
            CullingNode::Leaf { tile, .. } => out.push(*tile),
        }
    }
}
