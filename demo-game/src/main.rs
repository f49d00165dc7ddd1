mod demo_resources;
use demo_resources::{GpuImage, GpuImageData, Material};

use clockwork::resource::{MemorySource, ResourceCache, ResourceEvent, PRIORITY_LAST};
use std::sync::Arc;

fn checkerboard(
    width: u32,
    height: u32,
) -> GpuImageData {
    let mut image_bytes = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let value = if (x + y) % 2 == 0 { 255 } else { 0 };
            image_bytes.extend_from_slice(&[value, value, value, 255]);
        }
    }

    GpuImageData {
        width,
        height,
        image_bytes,
    }
}

// Stands in for files the content tools would have produced
fn build_demo_source() -> Arc<MemorySource> {
    let source = MemorySource::new("demo data");
    source.insert(
        "Materials/Floor.mat",
        "shader: lit\ntexture: Textures/Checker.img\ntexture: Textures/Missing.img",
    );
    source.insert("Materials/Wall.mat", "shader: unlit\ntexture: Textures/Checker.img");
    source.insert(
        "Textures/Checker.img",
        bincode::serialize(&checkerboard(8, 8)).unwrap(),
    );
    Arc::new(source)
}

fn main() {
    // Setup logging
    env_logger::Builder::default()
        .write_style(env_logger::WriteStyle::Always)
        .filter_level(log::LevelFilter::Debug)
        .init();

    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let cache = ResourceCache::builder()
        .register::<GpuImage>()
        .register::<Material>()
        .add_source(build_demo_source(), PRIORITY_LAST)
        .event_sender(event_tx)
        .build()
        .unwrap();

    cache.background_load::<Material>("Materials/Floor.mat");
    cache.background_load::<Material>("Materials/Wall.mat");

    let mut frame = 0;
    while cache.num_background_load_resources() > 0 {
        profiling::scope!("frame");
        std::thread::sleep(std::time::Duration::from_millis(15));
        let finished = cache.update();
        frame += 1;
        println!("frame {}: finished {} resources", frame, finished);

        for event in event_rx.try_iter() {
            match event {
                ResourceEvent::BackgroundLoaded { name, success, .. } => {
                    println!("{} loaded (success: {})", name, success)
                }
                ResourceEvent::LoadFailed { name, error, .. } => {
                    println!("{} failed to load: {}", name, error)
                }
                ResourceEvent::UnknownResourceType { name, .. } => {
                    println!("{} has an unregistered type", name)
                }
            }
        }
        profiling::finish_frame!();
    }

    // Already loaded, so this returns without touching the source again
    let floor = cache.get::<Material>("Materials/Floor.mat").unwrap();
    println!(
        "floor uses shader {} with {} of {} textures",
        floor.shader,
        floor.textures.len(),
        floor.texture_names.len()
    );
    println!("total memory use: {} bytes", cache.total_memory_use());
}
