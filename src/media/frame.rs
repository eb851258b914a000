//! Frame types exchanged between the host capture pipeline and media drivers

use super::error::MediaError;

/// A raw I420 video frame as delivered by the capture pipeline.
///
/// Planes may be padded: row `r` of plane `p` starts at `r * strides[p]`.
#[derive(Debug, Clone, Copy)]
pub struct VideoFrame<'a> {
    pub width: u32,
    pub height: u32,
    pub timestamp_ns: u64,
    /// Y, U and V planes
    pub planes: [&'a [u8]; 3],
    /// Bytes per row for each plane
    pub strides: [usize; 3],
}

/// A contiguous I420 buffer handed to the media driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I420Buffer {
    pub width: u32,
    pub height: u32,
    pub timestamp_ns: u64,
    data: Vec<u8>,
}

impl I420Buffer {
    /// Size of a packed I420 frame
    pub fn frame_size(width: u32, height: u32) -> usize {
        let luma = width as usize * height as usize;
        let (cw, ch) = chroma_size(width, height);
        luma + 2 * cw * ch
    }

    /// Pack a strided frame into a contiguous buffer
    pub fn from_frame(frame: &VideoFrame<'_>) -> Result<Self, MediaError> {
        let (w, h) = (frame.width as usize, frame.height as usize);
        let (cw, ch) = chroma_size(frame.width, frame.height);
        let dims = [(w, h), (cw, ch), (cw, ch)];

        let mut data = Vec::with_capacity(Self::frame_size(frame.width, frame.height));
        for (plane_idx, &(pw, ph)) in dims.iter().enumerate() {
            let plane = frame.planes[plane_idx];
            let stride = frame.strides[plane_idx];

            if ph == 0 || pw == 0 {
                continue;
            }
            if stride < pw {
                return Err(MediaError::InvalidFrame(format!(
                    "plane {} stride {} is narrower than width {}",
                    plane_idx, stride, pw
                )));
            }
            let needed = (ph - 1)
                .checked_mul(stride)
                .and_then(|n| n.checked_add(pw))
                .ok_or_else(|| {
                    MediaError::InvalidFrame(format!(
                        "plane {} stride {} overflows for height {}",
                        plane_idx, stride, ph
                    ))
                })?;
            if plane.len() < needed {
                return Err(MediaError::InvalidFrame(format!(
                    "plane {} has {} bytes, need {}",
                    plane_idx,
                    plane.len(),
                    needed
                )));
            }

            for row in 0..ph {
                let start = row * stride;
                data.extend_from_slice(&plane[start..start + pw]);
            }
        }

        Ok(Self {
            width: frame.width,
            height: frame.height,
            timestamp_ns: frame.timestamp_ns,
            data,
        })
    }

    /// The whole packed frame
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn y(&self) -> &[u8] {
        let luma = self.width as usize * self.height as usize;
        &self.data[..luma]
    }

    pub fn u(&self) -> &[u8] {
        let luma = self.width as usize * self.height as usize;
        let (cw, ch) = chroma_size(self.width, self.height);
        &self.data[luma..luma + cw * ch]
    }

    pub fn v(&self) -> &[u8] {
        let luma = self.width as usize * self.height as usize;
        let (cw, ch) = chroma_size(self.width, self.height);
        &self.data[luma + cw * ch..]
    }
}

fn chroma_size(width: u32, height: u32) -> (usize, usize) {
    (width.div_ceil(2) as usize, height.div_ceil(2) as usize)
}

/// An encoded (H.264) video packet
#[derive(Debug, Clone, Copy)]
pub struct EncodedVideoPacket<'a> {
    pub data: &'a [u8],
    pub pts: i64,
    pub dts: i64,
    pub keyframe: bool,
    pub width: u32,
    pub height: u32,
}

/// Interleaved 16-bit PCM audio
#[derive(Debug, Clone, Copy)]
pub struct AudioFrame<'a> {
    pub data: &'a [u8],
    /// Samples per channel
    pub frames: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp_ns: u64,
}
