use crate::config::SpawnConfig;
use crate::simulation::Vec3;
use rand::Rng;

/// Pick a spawn point near `owner`.
///
/// The owner's block gets a random horizontal offset of up to `radius`
/// blocks and a fixed `height`; x and z are centred in the target block.
pub fn spawn_point<R: Rng + ?Sized>(owner: Vec3, config: &SpawnConfig, rng: &mut R) -> Vec3 {
    let radius = config.radius.max(0);
    let dx = rng.gen_range(-radius..=radius);
    let dz = rng.gen_range(-radius..=radius);

    Vec3::new(
        owner.x.floor() + f64::from(dx) + 0.5,
        owner.y.floor() + f64::from(config.height),
        owner.z.floor() + f64::from(dz) + 0.5,
    )
}
