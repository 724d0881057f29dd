// ============================================================================
// AI COLLABORATORS - contracts for the hosted compose / analyze / edit models
// ============================================================================
//
// The crate never talks to a model itself. Hosts implement these traits over
// whatever transport they have; the session awaits them and owns everything
// that happens to the results.
//
// `FramedCompositor` is the one adapter shipped here: it does the square
// padding the model needs, so a backend only has to move padded images and a
// prompt over the wire.

use std::future::Future;

use image::Rgba;
use serde::{Deserialize, Serialize};

use crate::config::StageConfig;
use crate::error::CollaboratorError;
use crate::geometry::{Point, RelativePosition};
use crate::io::{ImageArtifact, decode_data_url, encode_data_url};
use crate::ops::transform::{crop_from_square, draw_marker, pad_to_square};
use crate::product::ScaleFactor;

/// Everything the compositor gets for one placement.
#[derive(Clone, Copy, Debug)]
pub struct ComposeRequest<'a> {
    pub product: &'a ImageArtifact,
    pub product_name: &'a str,
    pub scene: &'a ImageArtifact,
    pub scene_name: &'a str,
    pub position: RelativePosition,
    pub scale: ScaleFactor,
}

/// Compositor answer. Images travel as data-URL text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Composition {
    pub composite_image: String,
    /// Scene with the drop point marked, for inspection.
    pub debug_image: Option<String>,
    /// The final prompt text sent to the model.
    pub prompt: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditedImage {
    pub composite_image: String,
}

pub trait Compositor {
    fn compose(
        &self,
        request: ComposeRequest<'_>,
    ) -> impl Future<Output = Result<Composition, CollaboratorError>>;
}

pub trait Analyzer {
    fn analyze(
        &self,
        scene: &ImageArtifact,
    ) -> impl Future<Output = Result<String, CollaboratorError>>;
}

pub trait Editor {
    fn edit(
        &self,
        scene: &ImageArtifact,
        instruction: &str,
    ) -> impl Future<Output = Result<EditedImage, CollaboratorError>>;
}

// ============================================================================
// FRAMED COMPOSITOR
// ============================================================================

/// Square-framed inputs for a generative model.
#[derive(Clone, Debug)]
pub struct ModelRequest {
    /// Product, padded to `side × side`, PNG.
    pub product: ImageArtifact,
    /// Scene, padded to `side × side`, PNG.
    pub scene: ImageArtifact,
    pub prompt: String,
    pub side: u32,
    /// Drop point in square-frame pixels.
    pub marker: Point,
}

/// Transport to the hosted image model. Returns the generated square image
/// as data-URL text.
pub trait ModelBackend {
    fn generate(
        &self,
        request: ModelRequest,
    ) -> impl Future<Output = Result<String, CollaboratorError>>;
}

/// A [`Compositor`] that frames both images into the model's square input,
/// marks the drop point, and crops the model's answer back to the scene's
/// original aspect ratio and size.
pub struct FramedCompositor<B> {
    backend: B,
    side: u32,
    marker_radius: u32,
    marker_color: Rgba<u8>,
}

impl<B> FramedCompositor<B> {
    pub fn new(backend: B, config: &StageConfig) -> Self {
        Self {
            backend,
            side: config.model_input_side,
            marker_radius: config.marker_radius,
            marker_color: Rgba(config.debug_marker_color),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: ModelBackend> Compositor for FramedCompositor<B> {
    async fn compose(&self, request: ComposeRequest<'_>) -> Result<Composition, CollaboratorError> {
        let scene = request.scene.to_rgba().map_err(|e| invalid_input("scene", e))?;
        let product = request.product.to_rgba().map_err(|e| invalid_input("product", e))?;

        let (scene_sq, frame) = pad_to_square(&scene, self.side)
            .ok_or_else(|| CollaboratorError::InvalidInput("scene image is empty".into()))?;
        let (product_sq, _) = pad_to_square(&product, self.side)
            .ok_or_else(|| CollaboratorError::InvalidInput("product image is empty".into()))?;

        let marker = frame.to_square(request.position);
        let mut debug = scene_sq.clone();
        draw_marker(&mut debug, marker, self.marker_radius, self.marker_color);

        let prompt = build_prompt(&request, marker, self.side);
        log::info!(
            "Composing \"{}\" into {}x{} scene at ({:.0}, {:.0}) of {}px frame",
            request.product_name,
            scene.width(),
            scene.height(),
            marker.x,
            marker.y,
            self.side
        );

        let model_request = ModelRequest {
            product: ImageArtifact::from_rgba_png(&product_sq, "product-framed.png")
                .map_err(|e| invalid_input("product", e))?,
            scene: ImageArtifact::from_rgba_png(&scene_sq, "scene-framed.png")
                .map_err(|e| invalid_input("scene", e))?,
            prompt: prompt.clone(),
            side: self.side,
            marker,
        };
        let debug = ImageArtifact::from_rgba_png(&debug, "debug.png")
            .map_err(|e| invalid_input("debug", e))?;

        let generated = self.backend.generate(model_request).await?;

        let generated = decode_data_url(&generated, "generated.png")
            .and_then(|a| a.to_rgba())
            .map_err(|e| CollaboratorError::Model(format!("model returned an unreadable image: {e}")))?;
        let restored = crop_from_square(&generated, &frame);
        let composite = ImageArtifact::from_rgba_png(&restored, request.scene_name)
            .map_err(|e| CollaboratorError::Model(format!("could not encode result: {e}")))?;

        Ok(Composition {
            composite_image: encode_data_url(&composite),
            debug_image: Some(encode_data_url(&debug)),
            prompt: Some(prompt),
        })
    }
}

fn invalid_input(what: &str, err: impl std::fmt::Display) -> CollaboratorError {
    CollaboratorError::InvalidInput(format!("could not prepare {what} image: {err}"))
}

fn build_prompt(request: &ComposeRequest<'_>, marker: Point, side: u32) -> String {
    format!(
        "The first image is a room ({frame}x{frame}, padded with black bars that are not part \
         of the room). The second image is a product: {name}. Place the product into the room \
         so that it stands at pixel ({x:.0}, {y:.0}) of the room image, at {scale:.0}% of its \
         natural size for that spot. Match perspective, lighting and shadows. Do not change \
         anything else in the room and keep the black bars unchanged.",
        frame = side,
        name = request.product_name,
        x = marker.x,
        y = marker.y,
        scale = request.scale.percent(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Size;
    use image::RgbaImage;
    use std::cell::RefCell;

    /// Echoes the padded scene back, tinted, and remembers what it was sent.
    #[derive(Default)]
    struct EchoBackend {
        seen: RefCell<Option<ModelRequest>>,
    }

    impl ModelBackend for EchoBackend {
        async fn generate(&self, request: ModelRequest) -> Result<String, CollaboratorError> {
            let mut img = request.scene.to_rgba().unwrap();
            for p in img.pixels_mut() {
                if p[0] != 0 || p[1] != 0 || p[2] != 0 {
                    p[1] = 77;
                }
            }
            let out = ImageArtifact::from_rgba_png(&img, "out.png").unwrap();
            *self.seen.borrow_mut() = Some(request);
            Ok(encode_data_url(&out))
        }
    }

    struct BrokenBackend;

    impl ModelBackend for BrokenBackend {
        async fn generate(&self, _request: ModelRequest) -> Result<String, CollaboratorError> {
            Ok("not a data url".to_string())
        }
    }

    fn png(w: u32, h: u32, name: &str) -> ImageArtifact {
        ImageArtifact::from_rgba_png(&RgbaImage::from_pixel(w, h, Rgba([120, 10, 10, 255])), name)
            .unwrap()
    }

    fn config() -> StageConfig {
        StageConfig {
            model_input_side: 128,
            ..StageConfig::default()
        }
    }

    #[test]
    fn framed_compose_restores_scene_size() {
        let compositor = FramedCompositor::new(EchoBackend::default(), &config());
        let scene = png(200, 100, "room.png");
        let product = png(30, 60, "chair.png");
        let request = ComposeRequest {
            product: &product,
            product_name: "Chair",
            scene: &scene,
            scene_name: "room.png",
            position: RelativePosition::new(50.0, 50.0),
            scale: ScaleFactor::new(1.2),
        };
        let composition = pollster::block_on(compositor.compose(request)).unwrap();

        let composite = decode_data_url(&composition.composite_image, "c").unwrap();
        assert_eq!(composite.dimensions().unwrap(), Size::new(200.0, 100.0));
        assert_eq!(composite.to_rgba().unwrap().get_pixel(5, 5)[1], 77);

        let prompt = composition.prompt.unwrap();
        assert!(prompt.contains("Chair"));
        assert!(prompt.contains("(64, 64)"));
        assert!(prompt.contains("120%"));
        assert!(composition.debug_image.is_some());

        let seen = compositor.backend().seen.borrow();
        let seen = seen.as_ref().unwrap();
        assert_eq!(seen.side, 128);
        assert_eq!(seen.marker, Point::new(64.0, 64.0));
        assert_eq!(seen.scene.dimensions().unwrap(), Size::square(128.0));
        assert_eq!(seen.product.dimensions().unwrap(), Size::square(128.0));
    }

    #[test]
    fn unreadable_model_output_is_a_model_error() {
        let compositor = FramedCompositor::new(BrokenBackend, &config());
        let scene = png(20, 20, "room.png");
        let product = png(5, 5, "p.png");
        let request = ComposeRequest {
            product: &product,
            product_name: "P",
            scene: &scene,
            scene_name: "room.png",
            position: RelativePosition::new(0.0, 0.0),
            scale: ScaleFactor::default(),
        };
        let err = pollster::block_on(compositor.compose(request)).unwrap_err();
        assert!(matches!(err, CollaboratorError::Model(_)));
    }

    #[test]
    fn undecodable_scene_is_invalid_input() {
        let compositor = FramedCompositor::new(BrokenBackend, &config());
        let scene = ImageArtifact::new(vec![1, 2, 3], "room.png", "image/png");
        let product = png(5, 5, "p.png");
        let request = ComposeRequest {
            product: &product,
            product_name: "P",
            scene: &scene,
            scene_name: "room.png",
            position: RelativePosition::new(0.0, 0.0),
            scale: ScaleFactor::default(),
        };
        let err = pollster::block_on(compositor.compose(request)).unwrap_err();
        assert!(matches!(err, CollaboratorError::InvalidInput(_)));
    }
}
