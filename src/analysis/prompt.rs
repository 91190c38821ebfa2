use crate::analysis::types::MediaKind;

const BASE_PROMPT: &str = r#"You are a forensic media analyst specialised in detecting AI-generated content, voice cloning, face swapping and other digital manipulation.

Rules:
1. Reply with a single JSON object and nothing else. No markdown, no commentary.
2. Most legitimate content (professional photos, music, video) should land between 70 and 95.
3. Only go below 60 when there are clear manipulation artifacts.
4. Compression artifacts, noise and ordinary quality problems are NORMAL for real-world media.
5. "top5Factors" must be specific to this media, never generic.

JSON shape:
{
  "authenticityScore": <integer 0-100>,
  "confidenceLevel": "<Low|Medium|High>",
  "keyIndicators": [
    {"name": "<indicator>", "status": "<Natural|Suspicious>", "reason": "<short technical reason>"}
  ],
  "top5Factors": [
    {"title": "<factor>", "description": "<explanation for this media>", "confidence": <integer 0-100>, "category": "<Technical|Visual|Audio|Metadata|Pattern>"}
  ],
  "finalAssessment": "<one sentence technical summary>"
}

Score bands:
- 90-100: clearly authentic
- 70-89: likely authentic, normal quality variation
- 50-69: uncertain, needs human review
- 30-49: likely manipulated or generated
- 0-29: clearly artificial
"#;

const IMAGE_PROMPT: &str = r#"
Examine this IMAGE for generation or manipulation:
- Facial consistency: asymmetry, lighting on the face, skin texture
- Visual artifacts: edge blurring, pixel inconsistencies beyond normal JPEG compression
- Anatomy: impossible poses, wrong finger count, distorted proportions
- Lighting and shadows: conflicting light sources or shadow directions
- Background integration: poor edge blending, inconsistent perspective

Ordinary photos, selfies and social media images usually score 80-95.
"#;

const VIDEO_PROMPT: &str = r#"
Examine this VIDEO for deepfake or manipulation:
- Facial consistency across frames, face-swap seams
- Temporal consistency: flicker, morphing, unstable facial boundaries
- Audio-visual sync: lip movement against speech
- Audio quality: cloned-voice artifacts, robotic tone
- Motion artifacts and frame inconsistencies

Phone recordings and social media clips usually score 75-90. Compression, lighting changes and camera movement are natural.
"#;

const AUDIO_PROMPT: &str = r#"
Examine this AUDIO for voice cloning or synthesis:
- Voice naturalness: robotic tone, flat cadence, missing emotional inflection
- Breathing: absent or artificial breaths, unnatural pauses
- Background: inconsistent room tone, synthetic noise
- Spectrum: unnatural frequency distribution, missing harmonics
- Speech patterns: repetitive intonation

Studio production, auto-tune and mastering are normal. Commercial music and professional recordings should score 85-95 unless manipulation is clear.
"#;

/// 按媒体大类拼出完整提示词。
pub fn analysis_prompt(media_type: &str, media_name: &str) -> String {
    let specific = match MediaKind::from_mime(media_type) {
        MediaKind::Image => IMAGE_PROMPT,
        MediaKind::Video => VIDEO_PROMPT,
        MediaKind::Audio => AUDIO_PROMPT,
        MediaKind::Other => "",
    };
    format!("{BASE_PROMPT}{specific}\nFile: {media_name}\nType: {media_type}")
}

/// 超过内联上限的媒体不随请求上传，改为在提示词里描述文件信息。
pub fn large_media_prompt(media_type: &str, media_name: &str, size_bytes: usize) -> String {
    let size_mb = (size_bytes as f64 / (1024.0 * 1024.0)).round() as u64;
    let noun = MediaKind::from_mime(media_type).noun();
    format!(
        "{}\n\nNOTE: the {noun} itself is too large to attach ({size_mb}MB). Assess it from its characteristics:\n- Original filename: {media_name}\n- File type: {media_type}\n- File size: {size_mb}MB\n\nLarge high-resolution media is usually legitimate and file size alone is not a manipulation signal. Give a realistic score (typically 70-90 for legitimate large media) in the same JSON shape.",
        analysis_prompt(media_type, media_name)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_is_specific_to_media_kind() {
        let p = analysis_prompt("audio/mpeg", "song.mp3");
        assert!(p.contains("voice cloning or synthesis"));
        assert!(!p.contains("Examine this IMAGE"));
        assert!(p.ends_with("File: song.mp3\nType: audio/mpeg"));

        let p = analysis_prompt("application/octet-stream", "blob.bin");
        assert!(!p.contains("Examine this"));
        assert!(p.contains("\"authenticityScore\""));
    }

    #[test]
    fn large_prompt_describes_size() {
        let p = large_media_prompt("video/mp4", "clip.mp4", 20 * 1024 * 1024);
        assert!(p.contains("the video itself is too large"));
        assert!(p.contains("File size: 20MB"));
        assert!(p.contains("Original filename: clip.mp4"));
    }
}
