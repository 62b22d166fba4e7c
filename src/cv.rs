//! OpenCV backends: live capture, a HighGUI window, and OpenCV's corner
//! detector, pyramidal LK and Farneback flow.
use cv2::prelude::*;
use opencv as cv2;

use std::time::Duration;

use anyhow::{bail, Result};
use cv2::core::{Mat, Point2f, Size, TermCriteria, Vector};
use log::info;
use ndarray as nd;

use crate::dense_flow::{DenseFlowEstimator, DisplacementField, FlowParams};
use crate::detector::{DetectorParams, FeatureDetector};
use crate::display::DisplaySink;
use crate::frame::Frame;
use crate::image::{ColorImage, Image};
use crate::my_types::*;
use crate::optical_flow::{LkParams, PointEstimate, PointEstimator};
use crate::source::FrameSource;

trait AsArray {
    fn try_as_array(&self) -> Result<nd::Array3<u8>>;
}

impl AsArray for Mat {
    fn try_as_array(&self) -> Result<nd::Array3<u8>> {
        let bytes = self.data_bytes()?;
        let size = self.size()?;
        let a = nd::ArrayView3::from_shape((size.height as usize, size.width as usize, 3), bytes)?;
        Ok(a.to_owned())
    }
}

/// Borrowing view of a grayscale image; the Mat must not outlive `img`.
fn grayscale_to_cv_8u(img: &Image) -> Result<Mat> {
    let mat = unsafe {
        Mat::new_rows_cols_with_data(
            img.height as i32,
            img.width as i32,
            cv2::core::CV_8U,
            img.data.as_ptr() as *mut std::ffi::c_void,
            cv2::core::Mat_AUTO_STEP,
        )?
    };
    Ok(mat)
}

/// Owned BGR copy of an RGB image.
fn color_to_cv_bgr(img: &ColorImage) -> Result<Mat> {
    let data = img.data.as_standard_layout();
    let rgb = unsafe {
        Mat::new_rows_cols_with_data(
            img.height() as i32,
            img.width() as i32,
            cv2::core::CV_8UC3,
            data.as_ptr() as *mut std::ffi::c_void,
            cv2::core::Mat_AUTO_STEP,
        )?
    };
    let mut bgr = Mat::default();
    cv2::imgproc::cvt_color(&rgb, &mut bgr, cv2::imgproc::COLOR_RGB2BGR, 0)?;
    Ok(bgr)
}

fn to_cv_points(points: &[Vector2d]) -> Vector<Point2f> {
    points
        .iter()
        .map(|p| Point2f::new(p.x as f32, p.y as f32))
        .collect()
}

/// Camera or video file through `VideoCapture`.
pub struct CaptureSource {
    capture: cv2::videoio::VideoCapture,
    next_index: u64,
}

impl CaptureSource {
    /// `input` is a camera index or a video file path.
    pub fn open(input: &str) -> Result<Self> {
        let capture = match input.parse::<i32>() {
            Ok(index) => cv2::videoio::VideoCapture::new(index, cv2::videoio::CAP_ANY)?,
            Err(_) => cv2::videoio::VideoCapture::from_file(input, cv2::videoio::CAP_ANY)?,
        };
        if !capture.is_opened()? {
            bail!("could not open capture {input}");
        }
        info!("opened capture {input}");
        Ok(Self {
            capture,
            next_index: 0,
        })
    }
}

impl FrameSource for CaptureSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut bgr = Mat::default();
        if !self.capture.read(&mut bgr)? || bgr.empty() {
            return Ok(None);
        }
        let mut rgb = Mat::default();
        cv2::imgproc::cvt_color(&bgr, &mut rgb, cv2::imgproc::COLOR_BGR2RGB, 0)?;
        let color = ColorImage {
            data: rgb.try_as_array()?,
        };
        let frame = Frame::new(self.next_index, color);
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) -> Result<()> {
        self.capture.release()?;
        Ok(())
    }
}

/// Two HighGUI windows; pressing `q` asks the session to stop.
pub struct WindowSink {
    combined: String,
    tracks: String,
}

impl WindowSink {
    pub fn new() -> Self {
        Self {
            combined: "flow".to_string(),
            tracks: "tracks".to_string(),
        }
    }
}

impl Default for WindowSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplaySink for WindowSink {
    fn show(&mut self, _frame_index: u64, composite: &ColorImage, annotated: &ColorImage) -> Result<()> {
        cv2::highgui::imshow(&self.combined, &color_to_cv_bgr(composite)?)?;
        cv2::highgui::imshow(&self.tracks, &color_to_cv_bgr(annotated)?)?;
        Ok(())
    }

    fn poll_cancel(&mut self, timeout: Duration) -> Result<bool> {
        let key = cv2::highgui::wait_key(timeout.as_millis().max(1) as i32)?;
        Ok(key & 0xff == 'q' as i32)
    }

    fn release(&mut self) -> Result<()> {
        cv2::highgui::destroy_all_windows()?;
        Ok(())
    }
}

/// `goodFeaturesToTrack` with the Shi-Tomasi score.
#[derive(Debug, Default)]
pub struct GoodFeaturesDetector;

impl FeatureDetector for GoodFeaturesDetector {
    fn detect(&mut self, gray: &Image, params: &DetectorParams) -> Result<Vec<Vector2d>> {
        let mat = grayscale_to_cv_8u(gray)?;
        let mut corners = Vector::<Point2f>::new();
        cv2::imgproc::good_features_to_track(
            &mat,
            &mut corners,
            params.max_count as i32,
            params.quality_level,
            params.min_distance,
            &cv2::core::no_array(),
            params.block_size as i32,
            false,
            0.04,
        )?;
        Ok(corners
            .iter()
            .map(|p| Vector2d::new(p.x as f64, p.y as f64))
            .collect())
    }
}

/// `calcOpticalFlowPyrLK`.
#[derive(Debug, Default)]
pub struct LkEstimator;

impl PointEstimator for LkEstimator {
    fn estimate(
        &mut self,
        prev_gray: &Image,
        curr_gray: &Image,
        points: &[Vector2d],
        params: &LkParams,
    ) -> Result<PointEstimate> {
        if points.is_empty() {
            return Ok(PointEstimate::default());
        }
        let prev = grayscale_to_cv_8u(prev_gray)?;
        let curr = grayscale_to_cv_8u(curr_gray)?;
        let prev_points = to_cv_points(points);
        let mut next_points = Vector::<Point2f>::new();
        let mut status = Vector::<u8>::new();
        let mut err = Vector::<f32>::new();
        let criteria = TermCriteria::new(
            cv2::core::TermCriteria_COUNT + cv2::core::TermCriteria_EPS,
            params.iters as i32,
            params.epsilon,
        )?;
        let win = params.win_size as i32;
        cv2::video::calc_optical_flow_pyr_lk(
            &prev,
            &curr,
            &prev_points,
            &mut next_points,
            &mut status,
            &mut err,
            Size::new(win, win),
            params.max_level as i32,
            criteria,
            0,
            params.min_eig,
        )?;
        Ok(PointEstimate {
            points: next_points
                .iter()
                .map(|p| Vector2d::new(p.x as f64, p.y as f64))
                .collect(),
            status: status.iter().map(|s| s == 1).collect(),
        })
    }
}

/// `calcOpticalFlowFarneback`.
#[derive(Debug, Default)]
pub struct FarnebackFlow {
    flow: Mat,
}

impl DenseFlowEstimator for FarnebackFlow {
    fn estimate(
        &mut self,
        prev_gray: &Image,
        curr_gray: &Image,
        params: &FlowParams,
    ) -> Result<DisplacementField> {
        let prev = grayscale_to_cv_8u(prev_gray)?;
        let curr = grayscale_to_cv_8u(curr_gray)?;
        cv2::video::calc_optical_flow_farneback(
            &prev,
            &curr,
            &mut self.flow,
            params.pyr_scale,
            params.levels as i32,
            params.win_size as i32,
            params.iterations as i32,
            params.poly_n as i32,
            params.poly_sigma,
            0,
        )?;

        let mut field = DisplacementField::zeros(prev_gray.width, prev_gray.height);
        for y in 0..prev_gray.height {
            for x in 0..prev_gray.width {
                let dir: &Point2f = self.flow.at_2d(y as i32, x as i32)?;
                field.set_motion(x, y, Vector2d::new(dir.x as f64, dir.y as f64));
            }
        }
        Ok(field)
    }
}
