use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Runtime audio output wrapping rodio. Not `Send`: lives on the audio thread.
pub struct Player {
    _stream: OutputStream,
    stream_handle: OutputStreamHandle,
}

impl Player {
    /// Open the default output device.
    pub fn new() -> Result<Self, String> {
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| format!("Failed to open audio output: {}", e))?;
        Ok(Player {
            _stream: stream,
            stream_handle: handle,
        })
    }

    /// Open the output device whose name matches `name`.
    pub fn new_with_device(name: &str) -> Result<Self, String> {
        let host = rodio::cpal::default_host();
        let device = host
            .output_devices()
            .map_err(|e| format!("Failed to list audio outputs: {}", e))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| format!("Audio output '{}' not found", name))?;
        let (stream, handle) = OutputStream::try_from_device(&device)
            .map_err(|e| format!("Failed to open audio output '{}': {}", name, e))?;
        Ok(Player {
            _stream: stream,
            stream_handle: handle,
        })
    }

    pub fn open(device_name: Option<&str>) -> Result<Self, String> {
        match device_name {
            Some(name) => Self::new_with_device(name),
            None => Self::new(),
        }
    }

    fn create_sink(&self) -> Result<Sink, String> {
        Sink::try_new(&self.stream_handle).map_err(|e| format!("Failed to create sink: {}", e))
    }

    /// Play a file once on a fresh sink at `volume`.
    pub fn play_once(&self, path: &Path, volume: f32) -> Result<Sink, String> {
        let source = decode(path)?;
        let sink = self.create_sink()?;
        sink.set_volume(volume);
        sink.append(source);
        sink.play();
        Ok(sink)
    }

    /// Loop a file forever on a fresh sink at `volume`.
    pub fn play_looped(&self, path: &Path, volume: f32) -> Result<Sink, String> {
        let source = decode(path)?;
        let sink = self.create_sink()?;
        sink.set_volume(volume);
        sink.append(source.repeat_infinite());
        sink.play();
        Ok(sink)
    }
}

fn decode(path: &Path) -> Result<Decoder<BufReader<File>>, String> {
    let file = File::open(path).map_err(|e| format!("Cannot open '{}': {}", path.display(), e))?;
    Decoder::new(BufReader::new(file)).map_err(|e| format!("Cannot decode '{}': {}", path.display(), e))
}
