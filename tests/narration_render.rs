use std::sync::Arc;

use studio_core::script::{prepare_narration, split_narration};
use studio_core::visualizer::{
    AudioSession, ClipWindow, ColorMode, PixmapSurface, SpectrumStyle, Visualizer,
};
use studio_core::{AudioBuffer, decode_pcm16, decode_wav, encode_wav, try_merge_wav};

fn tone(rate: u32, seconds: f32, freq: f32) -> AudioBuffer {
    let n = (rate as f32 * seconds) as usize;
    let samples = (0..n)
        .map(|i| {
            let v = 0.4 * (std::f32::consts::TAU * freq * i as f32 / rate as f32).sin();
            (v * 32768.0).round() / 32768.0
        })
        .collect();
    AudioBuffer::new(rate, vec![samples]).unwrap()
}

#[test]
fn narrated_chunks_merge_into_one_playable_wav() {
    let script = "# Scene 1\n\n[SFX: WIND]\nThe city wakes.\n\n## Scene 2\n\nA train arrives, right on time.";
    let text = prepare_narration(script);
    assert!(!text.contains('#'));
    assert!(!text.contains("WIND"));

    let chunks = split_narration(&text, 24);
    assert!(chunks.len() > 1);

    // one fake speech reply per chunk, raw PCM like the speech endpoint returns
    let parts: Vec<Vec<u8>> = chunks
        .iter()
        .map(|_| {
            let wav = encode_wav(&tone(24000, 0.25, 440.0)).unwrap();
            let pcm = &wav[44..];
            encode_wav(&decode_pcm16(pcm, 24000, 1).unwrap()).unwrap()
        })
        .collect();
    let merged = try_merge_wav(&parts.iter().map(Vec::as_slice).collect::<Vec<_>>()).unwrap();

    let audio = decode_wav(&merged).unwrap();
    assert_eq!(audio.sample_rate(), 24000);
    assert_eq!(audio.frames(), 6000 * chunks.len());
}

#[test]
fn offline_render_records_frames_in_step_with_audio() {
    let dir = tempfile::tempdir().unwrap();
    let audio = Arc::new(tone(8000, 2.0, 300.0));

    let mut vis = Visualizer::new(SpectrumStyle::Radial, ColorMode::Fire);
    vis.caption = Some("Episode one".into());
    let mut session = AudioSession::new(PixmapSurface::new(64, 96).unwrap(), vis);
    session.play(audio, Some(ClipWindow::new(0.5, 0.5)));
    session.pause();
    session.start_recording(16).unwrap();

    for _ in 0..16 {
        session.step(1.0 / 16.0);
    }
    let recording = session.stop_recording().unwrap().unwrap();
    assert!(!session.is_playing());
    session.dispose();
    session.dispose();

    assert_eq!(recording.fps, 16);
    assert_eq!(recording.frames.len(), 16);
    // the half-second clip plays twice
    assert_eq!(recording.duration_secs(), 1.0);
    for pair in recording.frames.windows(2) {
        assert!(pair[1].at > pair[0].at);
    }

    let files = recording.write_to_dir(dir.path()).unwrap();
    assert_eq!(files.frames, 16);
    assert!(dir.path().join("frame_00015.png").exists());
    let wav = std::fs::read(files.audio).unwrap();
    assert_eq!(decode_wav(&wav).unwrap().sample_rate(), 8000);
}
