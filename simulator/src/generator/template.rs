use posecore::protocol::{Landmark, LandmarkMap, BODY_LANDMARK_COUNT};

/// Normalized (x, y, z) for every body landmark of a person standing square
/// to the camera, arms relaxed.
const STANDING: [(f32, f32, f32); BODY_LANDMARK_COUNT as usize] = [
    (0.500, 0.180, -0.30),
    (0.510, 0.165, -0.28),
    (0.518, 0.165, -0.28),
    (0.526, 0.166, -0.28),
    (0.490, 0.165, -0.28),
    (0.482, 0.165, -0.28),
    (0.474, 0.166, -0.28),
    (0.536, 0.175, -0.15),
    (0.464, 0.175, -0.15),
    (0.512, 0.198, -0.26),
    (0.488, 0.198, -0.26),
    (0.580, 0.280, -0.10),
    (0.420, 0.280, -0.10),
    (0.610, 0.400, -0.08),
    (0.390, 0.400, -0.08),
    (0.620, 0.510, -0.10),
    (0.380, 0.510, -0.10),
    (0.625, 0.540, -0.11),
    (0.375, 0.540, -0.11),
    (0.618, 0.545, -0.11),
    (0.382, 0.545, -0.11),
    (0.612, 0.530, -0.10),
    (0.388, 0.530, -0.10),
    (0.550, 0.540, 0.00),
    (0.450, 0.540, 0.00),
    (0.555, 0.700, 0.02),
    (0.445, 0.700, 0.02),
    (0.558, 0.860, 0.06),
    (0.442, 0.860, 0.06),
    (0.556, 0.880, 0.07),
    (0.444, 0.880, 0.07),
    (0.570, 0.900, 0.00),
    (0.430, 0.900, 0.00),
];

pub fn standing_pose() -> LandmarkMap {
    STANDING
        .iter()
        .enumerate()
        .map(|(index, &(x, y, z))| (index as u8, Landmark::new(x, y, z).with_visibility(0.98)))
        .collect()
}
