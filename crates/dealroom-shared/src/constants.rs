use std::time::Duration;

/// Sale-request refresh interval.
pub const SALE_REQUEST_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on background attachment-URL resolution after a fetch.
pub const ATTACHMENT_URL_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a validation notice (e.g. "PDF only") stays visible.
pub const VALIDATION_DISMISS_AFTER: Duration = Duration::from_secs(3);

/// Delay before leaving a thread that no longer exists.
pub const NOT_FOUND_REDIRECT_DELAY: Duration = Duration::from_secs(2);

/// Wait after a signature commit before re-reading the registry, so the
/// object store has settled.
pub const REGISTRY_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Maximum number of paths per signed-URL request.
pub const SIGNED_URL_BATCH_SIZE: usize = 50;

/// Default signed-URL lifetime in seconds.
pub const SIGNED_URL_EXPIRY_SECS: u64 = 3600;

/// Signature drawing surface, in pixels.
pub const SIGNATURE_CANVAS_WIDTH: u32 = 600;
pub const SIGNATURE_CANVAS_HEIGHT: u32 = 200;

/// Stroke used on the drawing surface (#323232, 2px, round caps).
pub const SIGNATURE_STROKE_RGB: [u8; 3] = [0x32, 0x32, 0x32];
pub const SIGNATURE_STROKE_WIDTH: f32 = 2.0;

/// Embedded signature width: `min(page_width * RATIO, MAX)` PDF units.
pub const SIGNATURE_PAGE_WIDTH_RATIO: f32 = 0.28;
pub const SIGNATURE_MAX_WIDTH: f32 = 320.0;

/// Overlay geometry for image documents (CSS pixels).
pub const OVERLAY_TOP_OFFSET: u32 = 20;
pub const OVERLAY_STACK_STEP: u32 = 120;
pub const OVERLAY_RIGHT_OFFSET: u32 = 20;
pub const OVERLAY_MAX_WIDTH: u32 = 250;

/// Number of participants whose signatures make a document fully signed.
pub const REQUIRED_SIGNERS: usize = 2;

pub const PDF_MIME: &str = "application/pdf";
pub const PNG_MIME: &str = "image/png";

/// Object-store buckets, addressed by path prefix.
pub const BUCKET_MESSAGE_IMAGES: &str = "message-images";
pub const BUCKET_CONTRACT_DOCUMENTS: &str = "contract-documents";
pub const BUCKET_PROFILE_ICONS: &str = "profile-icons";
pub const BUCKET_AVATARS: &str = "avatars";
pub const BUCKET_POST_IMAGES: &str = "post-images";
